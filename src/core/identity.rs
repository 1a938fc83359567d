//! Server identity used in startup logs and `SERVER_NAME`.
use crate::{ports::resolver::NameResolver, tracing_setup::ServerLogger};

const FALLBACK_NAME: &str = "localhost";

/// Whether `name` looks like a dotted numeric address.
fn is_numeric_address(name: &str) -> bool {
    name.chars().all(|c| c == '.' || c.is_ascii_digit())
}

/// Compute a human-readable name for the address the server is bound to.
///
/// An empty address stands for the local hostname. Numeric addresses are
/// returned untouched; anything else is passed through the resolver, keeping
/// the original string when the lookup fails. Never fails.
pub fn compute_server_name(
    bound_address: &str,
    resolver: &dyn NameResolver,
    logger: &ServerLogger,
) -> String {
    let name = if bound_address.is_empty() {
        match resolver.local_hostname() {
            Ok(hostname) => hostname,
            Err(e) => {
                logger.verbose_info(&format!("Cannot read local hostname: {e}"));
                FALLBACK_NAME.to_string()
            }
        }
    } else {
        bound_address.to_string()
    };

    if is_numeric_address(&name) {
        return name;
    }

    logger.verbose_info("Computing hostname");
    match resolver.reverse_lookup(&name) {
        Ok(resolved) if !resolved.is_empty() => resolved,
        Ok(_) => name,
        Err(e) => {
            logger.verbose_info(&format!("Cannot do reverse lookup for {name}: {e}"));
            name
        }
    }
}
