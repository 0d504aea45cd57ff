use std::net::{SocketAddr, ToSocketAddrs};

use url::{Host, Url};

use crate::structures::{LinkError, TResult};

pub const SCHEME: &str = "tcp";

// Accepts "tcp://host:port", "host:port" or a literal socket address.
// Names are resolved here, once; the first address wins.
pub fn parse_endpoint_uri(input: &str) -> TResult<SocketAddr> {
    let input = input.trim();
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if !input.contains("://") {
        let (host, port) = input.rsplit_once(':').ok_or_else(|| invalid(input, "missing port"))?;
        let port = port.parse::<u16>().map_err(|_| invalid(input, "bad port"))?;
        return resolve(host, port, input);
    }

    let url = Url::parse(input).map_err(|e| invalid(input, &e.to_string()))?;
    if url.scheme() != SCHEME {
        return Err(invalid(input, "scheme must be tcp"));
    }
    let port = url.port().ok_or_else(|| invalid(input, "missing port"))?;
    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(SocketAddr::new(ip.into(), port)),
        Some(Host::Ipv6(ip)) => Ok(SocketAddr::new(ip.into(), port)),
        Some(Host::Domain(name)) => resolve(name, port, input),
        None => Err(invalid(input, "missing host")),
    }
}

pub fn describe_endpoint(addr: &SocketAddr) -> String {
    format!("{}://{}", SCHEME, addr)
}

fn resolve(host: &str, port: u16, input: &str) -> TResult<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(input, &e.to_string()))?
        .next()
        .ok_or_else(|| invalid(input, "host resolved to nothing"))
}

fn invalid(input: &str, why: &str) -> LinkError {
    LinkError::InvalidEndpoint(format!("{input}: {why}"))
}

#[cfg(test)]
mod tests {
    use super::{describe_endpoint, parse_endpoint_uri};
    use crate::structures::LinkError;

    #[test]
    fn parse_tcp_uri() {
        let addr = parse_endpoint_uri("tcp://127.0.0.1:55555").unwrap();
        assert_eq!(addr, "127.0.0.1:55555".parse().unwrap());
    }

    #[test]
    fn parse_ipv6_uri() {
        let addr = parse_endpoint_uri("tcp://[::1]:4000").unwrap();
        assert_eq!(addr, "[::1]:4000".parse().unwrap());
    }

    #[test]
    fn parse_bare_host_port() {
        let addr = parse_endpoint_uri(" 10.0.0.7:9000 ").unwrap();
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn reject_other_scheme() {
        let err = parse_endpoint_uri("http://127.0.0.1:80").unwrap_err();
        assert!(matches!(err, LinkError::InvalidEndpoint(_)));
    }

    #[test]
    fn reject_missing_port() {
        assert!(parse_endpoint_uri("tcp://127.0.0.1").is_err());
        assert!(parse_endpoint_uri("127.0.0.1").is_err());
        assert!(parse_endpoint_uri("127.0.0.1:notaport").is_err());
    }

    #[test]
    fn describe_roundtrips_through_parse() {
        let addr = "127.0.0.1:55555".parse().unwrap();
        let text = describe_endpoint(&addr);
        assert_eq!(text, "tcp://127.0.0.1:55555");
        assert_eq!(parse_endpoint_uri(&text).unwrap(), addr);
    }
}
