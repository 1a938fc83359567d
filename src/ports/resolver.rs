use std::io;

/// NameResolver defines the port for hostname and reverse-DNS lookups used to
/// compute the server identity.
pub trait NameResolver: Send + Sync {
    /// The local machine's hostname.
    fn local_hostname(&self) -> io::Result<String>;

    /// Resolve `name` and return the canonical host name for it.
    fn reverse_lookup(&self, name: &str) -> io::Result<String>;
}
