//! resolving who called into the tracking entry points.
use crate::error::{TraceError, TraceResult};

/// The `(class, method)` pair naming one caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub class_name: String,
    pub method_name: String,
}

/// Resolves the identity of the immediate caller of a tracking entry point.
///
/// Stub it in tests, or replace it per platform with whatever stack
/// introspection is available there.
pub trait IdentityProvider: Send + Sync {
    fn resolve_caller(&self) -> TraceResult<CallerIdentity>;
}

/// Always answers with one preset identity.
#[derive(Debug, Clone)]
pub struct FixedIdentity {
    identity: CallerIdentity,
}

impl FixedIdentity {
    pub fn new(class_name: &str, method_name: &str) -> TraceResult<FixedIdentity> {
        if class_name.trim().is_empty() || method_name.trim().is_empty() {
            return Err(TraceError::InvalidArgument(
                "fixed identity needs a class and a method name",
            ));
        }
        Ok(FixedIdentity {
            identity: CallerIdentity {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
            },
        })
    }
}

impl IdentityProvider for FixedIdentity {
    fn resolve_caller(&self) -> TraceResult<CallerIdentity> {
        Ok(self.identity.clone())
    }
}

/// Walks the captured call stack and names the first frame that does not
/// belong to this crate, to the runtime, or to a constructor.
#[derive(Debug, Default)]
pub struct StackIdentity;

impl IdentityProvider for StackIdentity {
    fn resolve_caller(&self) -> TraceResult<CallerIdentity> {
        let trace = backtrace::Backtrace::new();
        for frame in trace.frames() {
            for symbol in frame.symbols() {
                let name = match symbol.name() {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                let name = strip_hash(&name);
                if !qualifies(name) {
                    continue;
                }
                return split_identity(name).ok_or_else(|| {
                    TraceError::Tracking(format!("malformed caller symbol: {}", name))
                });
            }
        }
        Err(TraceError::Tracking(
            "no caller frame could be resolved".to_string(),
        ))
    }
}

/// Demangled symbols end in a `::h<16 hex digits>` disambiguator.
fn strip_hash(name: &str) -> &str {
    match name.rfind("::h") {
        Some(position) if name.len() - position == 19 => &name[..position],
        _ => name,
    }
}

fn qualifies(name: &str) -> bool {
    // our own test functions must stay resolvable.
    if name.contains("::tests::") {
        return !name.contains("{{closure}}");
    }
    // trait impl frames read `<crate::Type as crate::Trait>::method`, so
    // prefix checks are not enough for our own frames.
    !(name.contains("method_tracer")
        || name.starts_with("backtrace")
        || name.starts_with("std")
        || name.starts_with("core")
        || name.starts_with("alloc")
        || name.starts_with("__")
        || name.starts_with("rust_")
        || name.contains("{{closure}}")
        || name.ends_with("::new"))
}

fn split_identity(name: &str) -> Option<CallerIdentity> {
    let position = name.rfind("::")?;
    let class_name = &name[..position];
    let method_name = &name[position + 2..];
    if class_name.is_empty() || method_name.is_empty() {
        return None;
    }
    Some(CallerIdentity {
        class_name: class_name.to_string(),
        method_name: method_name.to_string(),
    })
}
