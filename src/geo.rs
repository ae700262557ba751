//! IP-to-country lookup contract.
//!
//! The server only needs a 2-letter code for the `ADDUSER` broadcast; the
//! actual database is an external collaborator. The default resolver
//! reports the unknown code.

use std::net::IpAddr;

/// Country code used when no resolver data is available.
pub const UNKNOWN_COUNTRY: &str = "??";

/// Pure IP → ISO 3166 alpha-2 lookup.
pub trait CountryResolver: Send + Sync {
    /// Resolve the country code for an address.
    fn country(&self, ip: IpAddr) -> String;
}

/// Resolver used when no geolocation database is configured.
pub struct UnknownCountry;

impl CountryResolver for UnknownCountry {
    fn country(&self, _ip: IpAddr) -> String {
        UNKNOWN_COUNTRY.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolver_is_unknown() {
        let resolver = UnknownCountry;
        assert_eq!(resolver.country("127.0.0.1".parse().unwrap()), "??");
    }
}
