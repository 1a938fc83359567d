use std::io;

use crate::ports::resolver::NameResolver;

/// Resolver backed by the operating system (`gethostname`, `getaddrinfo`,
/// `getnameinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl NameResolver for SystemResolver {
    fn local_hostname(&self) -> io::Result<String> {
        dns_lookup::get_hostname()
    }

    fn reverse_lookup(&self, name: &str) -> io::Result<String> {
        let addresses = dns_lookup::lookup_host(name)?;
        let address = addresses.first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {name}"))
        })?;
        dns_lookup::lookup_addr(address)
    }
}
