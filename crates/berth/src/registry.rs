//! Turning description strings into endpoints.
//!
//! The registry knows the built-in endpoint types and any registered
//! plugin parsers. Builtins win; a plugin whose prefix shadows a builtin
//! is never consulted.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use berth_core::{
    AddressFamily, CertificateBundle, ClientEndpoint, EndpointError, EndpointResult, IoDriver,
    ServerEndpoint,
};

use crate::adopted::{AdoptedStreamServerEndpoint, ListenFds};
use crate::parser::{parse_flag, parse_mode, parse_port, parse_u32, EndpointDescriptor};
use crate::stdio::StandardIoEndpoint;
use crate::tcp::{TcpClientEndpoint, TcpServerEndpoint};
use crate::tls::{TlsClientEndpoint, TlsServerEndpoint};
use crate::unix::{UnixClientEndpoint, UnixServerEndpoint};

/// Part of the compatible CLI surface; the wording (including the missing
/// space) must not change.
const UNQUALIFIED: &str = "Unqualified strport description passed to 'service'.\
Use qualified endpoint descriptions; for example, 'tcp:4321'.";

const SERVER_BUILTINS: &[&str] = &["tcp", "tcp6", "ssl", "unix", "stdio", "systemd"];

/// A third-party parser for one endpoint type tag.
///
/// The positional and keyword arguments arrive as the strings from the
/// description, untouched beyond unescaping; interpretation is entirely
/// the plugin's.
pub trait EndpointStringParser: Send + Sync + fmt::Debug {
    /// The type tag this parser claims.
    fn prefix(&self) -> &str;

    /// Builds a server endpoint from the description's arguments.
    fn parse_stream_server(
        &self,
        driver: Arc<dyn IoDriver>,
        positional: &[String],
        keyword: &HashMap<String, String>,
    ) -> EndpointResult<Box<dyn ServerEndpoint>> {
        let _ = (driver, positional, keyword);
        Err(EndpointError::Parse(format!(
            "'{}' descriptions do not describe servers",
            self.prefix()
        )))
    }

    /// Builds a client endpoint from the description's arguments.
    fn parse_stream_client(
        &self,
        driver: Arc<dyn IoDriver>,
        positional: &[String],
        keyword: &HashMap<String, String>,
    ) -> EndpointResult<Box<dyn ClientEndpoint>> {
        let _ = (driver, positional, keyword);
        Err(EndpointError::Parse(format!(
            "'{}' descriptions do not describe clients",
            self.prefix()
        )))
    }
}

/// The set of endpoint types descriptions can name.
#[derive(Debug)]
pub struct EndpointRegistry {
    plugins: Vec<Arc<dyn EndpointStringParser>>,
    listen_fds: ListenFds,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    /// A registry with the built-in types and the descriptor inventory
    /// read from the environment.
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            listen_fds: ListenFds::from_env(),
        }
    }

    /// Replaces the inherited-descriptor inventory.
    #[must_use]
    pub fn with_listen_fds(mut self, listen_fds: ListenFds) -> Self {
        self.listen_fds = listen_fds;
        self
    }

    /// Registers a plugin parser. Registration order decides between
    /// plugins claiming the same prefix; builtins always win.
    pub fn register(&mut self, parser: Arc<dyn EndpointStringParser>) {
        self.plugins.push(parser);
    }

    /// Builds a server endpoint from a description string.
    pub fn server_from_string(
        &self,
        driver: Arc<dyn IoDriver>,
        description: &str,
    ) -> EndpointResult<Box<dyn ServerEndpoint>> {
        let descriptor = EndpointDescriptor::parse(description)?;
        self.build_server(driver, descriptor)
    }

    /// Builds a server endpoint, falling back to `default_tag` when the
    /// description does not start with a recognized type tag.
    ///
    /// With no default, an unqualified description (the legacy bare-port
    /// form) is rejected.
    pub fn server_from_string_with_default(
        &self,
        driver: Arc<dyn IoDriver>,
        description: &str,
        default_tag: Option<&str>,
    ) -> EndpointResult<Box<dyn ServerEndpoint>> {
        match default_tag {
            Some(tag) => {
                let descriptor = EndpointDescriptor::parse_with_default(description, tag, |t| {
                    self.is_known_server_tag(t)
                })?;
                self.build_server(driver, descriptor)
            }
            None => self.server_from_string(driver, description),
        }
    }

    /// Builds a client endpoint from a description string.
    pub fn client_from_string(
        &self,
        driver: Arc<dyn IoDriver>,
        description: &str,
    ) -> EndpointResult<Box<dyn ClientEndpoint>> {
        let descriptor = EndpointDescriptor::parse(description)?;
        let tag = descriptor.type_tag.clone();
        match tag.as_str() {
            "tcp" => parse_tcp_client(driver, descriptor),
            "ssl" => parse_tls_client(driver, descriptor),
            "unix" => parse_unix_client(driver, descriptor),
            _ => {
                for plugin in &self.plugins {
                    if plugin.prefix() == tag {
                        return plugin.parse_stream_client(
                            driver,
                            &descriptor.positional,
                            &descriptor.keyword,
                        );
                    }
                }
                Err(unknown_tag(&tag))
            }
        }
    }

    fn is_known_server_tag(&self, tag: &str) -> bool {
        SERVER_BUILTINS.contains(&tag) || self.plugins.iter().any(|p| p.prefix() == tag)
    }

    fn build_server(
        &self,
        driver: Arc<dyn IoDriver>,
        descriptor: EndpointDescriptor,
    ) -> EndpointResult<Box<dyn ServerEndpoint>> {
        let tag = descriptor.type_tag.clone();
        match tag.as_str() {
            "tcp" => parse_tcp_server(driver, descriptor, AddressFamily::Inet),
            "tcp6" => parse_tcp_server(driver, descriptor, AddressFamily::Inet6),
            "ssl" => parse_tls_server(driver, descriptor),
            "unix" => parse_unix_server(driver, descriptor),
            "stdio" => {
                bind_arguments("stdio", descriptor, &[])?;
                Ok(Box::new(StandardIoEndpoint::new(driver)))
            }
            "systemd" => parse_systemd_server(driver, descriptor, &self.listen_fds),
            _ => {
                for plugin in &self.plugins {
                    if plugin.prefix() == tag {
                        return plugin.parse_stream_server(
                            driver,
                            &descriptor.positional,
                            &descriptor.keyword,
                        );
                    }
                }
                Err(unknown_tag(&tag))
            }
        }
    }
}

/// A bare port number is the pre-description legacy form; steer the user
/// to the qualified syntax rather than calling the number an unknown type.
fn unknown_tag(tag: &str) -> EndpointError {
    if !tag.is_empty() && tag.bytes().all(|b| b.is_ascii_digit()) {
        EndpointError::Parse(UNQUALIFIED.to_string())
    } else {
        EndpointError::UnknownEndpointType(tag.to_string())
    }
}

/// Matches positional arguments to names, then merges keywords, rejecting
/// unknown names and double assignment.
fn bind_arguments(
    tag: &str,
    descriptor: EndpointDescriptor,
    names: &[&str],
) -> EndpointResult<HashMap<String, String>> {
    let EndpointDescriptor {
        positional, keyword, ..
    } = descriptor;
    if positional.len() > names.len() {
        return Err(EndpointError::Parse(format!(
            "too many arguments for '{tag}' endpoint"
        )));
    }
    let mut values = HashMap::new();
    for (name, value) in names.iter().zip(positional) {
        values.insert((*name).to_string(), value);
    }
    for (key, value) in keyword {
        if !names.contains(&key.as_str()) {
            return Err(EndpointError::Parse(format!(
                "unknown argument '{key}' for '{tag}' endpoint"
            )));
        }
        if values.contains_key(&key) {
            return Err(EndpointError::Parse(format!(
                "argument '{key}' supplied both positionally and by name"
            )));
        }
        values.insert(key, value);
    }
    Ok(values)
}

fn required<'a>(
    values: &'a HashMap<String, String>,
    tag: &str,
    name: &str,
) -> EndpointResult<&'a str> {
    values
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| EndpointError::Parse(format!("missing '{name}' for '{tag}' endpoint")))
}

fn parse_tcp_server(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
    family: AddressFamily,
) -> EndpointResult<Box<dyn ServerEndpoint>> {
    let tag = descriptor.type_tag.clone();
    let values = bind_arguments(&tag, descriptor, &["port", "interface", "backlog"])?;
    let port = parse_port("port", required(&values, &tag, "port")?)?;
    let mut endpoint = match family {
        AddressFamily::Inet6 => TcpServerEndpoint::new_v6(driver, port),
        _ => TcpServerEndpoint::new(driver, port),
    };
    if let Some(interface) = values.get("interface") {
        endpoint = endpoint.interface(interface.clone());
    }
    if let Some(backlog) = values.get("backlog") {
        endpoint = endpoint.backlog(parse_u32("backlog", backlog)?);
    }
    Ok(Box::new(endpoint))
}

fn parse_tls_server(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
) -> EndpointResult<Box<dyn ServerEndpoint>> {
    let values = bind_arguments(
        "ssl",
        descriptor,
        &["port", "privateKey", "certKey", "interface", "backlog"],
    )?;
    let port = parse_port("port", required(&values, "ssl", "port")?)?;
    let private_key = values
        .get("privateKey")
        .map_or("server.pem", String::as_str);
    let cert_key = values.get("certKey").map(String::as_str);
    let certificates =
        CertificateBundle::for_server(Path::new(private_key), cert_key.map(Path::new))?;
    let mut endpoint = TlsServerEndpoint::new(driver, port, certificates);
    if let Some(interface) = values.get("interface") {
        endpoint = endpoint.interface(interface.clone());
    }
    if let Some(backlog) = values.get("backlog") {
        endpoint = endpoint.backlog(parse_u32("backlog", backlog)?);
    }
    Ok(Box::new(endpoint))
}

fn parse_unix_server(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
) -> EndpointResult<Box<dyn ServerEndpoint>> {
    let values = bind_arguments(
        "unix",
        descriptor,
        &["path", "mode", "backlog", "lockfile", "wantPID"],
    )?;
    let path = required(&values, "unix", "path")?;
    let mut endpoint = UnixServerEndpoint::new(driver, path);
    if let Some(mode) = values.get("mode") {
        endpoint = endpoint.mode(parse_mode("mode", mode)?);
    }
    if let Some(backlog) = values.get("backlog") {
        endpoint = endpoint.backlog(parse_u32("backlog", backlog)?);
    }
    // Two spellings for the pid-lockfile switch; "lockfile" is the
    // documented one.
    if let Some(flag) = values.get("lockfile").or_else(|| values.get("wantPID")) {
        endpoint = endpoint.want_peer_pid(parse_flag("lockfile", flag)?);
    }
    Ok(Box::new(endpoint))
}

fn parse_systemd_server(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
    listen_fds: &ListenFds,
) -> EndpointResult<Box<dyn ServerEndpoint>> {
    let values = bind_arguments("systemd", descriptor, &["domain", "index"])?;
    let family = match required(&values, "systemd", "domain")? {
        "INET" => AddressFamily::Inet,
        "INET6" => AddressFamily::Inet6,
        "UNIX" => AddressFamily::Unix,
        other => {
            return Err(EndpointError::Parse(format!(
                "invalid value for domain: '{other}'"
            )));
        }
    };
    let index = parse_u32("index", required(&values, "systemd", "index")?)? as usize;
    let fd = listen_fds.descriptor(index).ok_or_else(|| {
        EndpointError::Parse(format!(
            "systemd descriptor index {index} is not in the inherited set"
        ))
    })?;
    Ok(Box::new(AdoptedStreamServerEndpoint::new(
        driver, fd, family,
    )))
}

/// Positional host/port assignment for client descriptions: two
/// positionals are host then port; a single one is the port when the host
/// arrived by keyword, the host otherwise.
fn assign_host_port(
    tag: &str,
    values: &mut HashMap<String, String>,
    positional: Vec<String>,
) -> EndpointResult<()> {
    match positional.len() {
        0 => {}
        1 => {
            let name = if values.contains_key("host") {
                "port"
            } else {
                "host"
            };
            if values.contains_key(name) {
                return Err(EndpointError::Parse(format!(
                    "argument '{name}' supplied both positionally and by name"
                )));
            }
            values.insert(name.to_string(), positional.into_iter().next().unwrap_or_default());
        }
        2 => {
            let mut it = positional.into_iter();
            for name in ["host", "port"] {
                if values.contains_key(name) {
                    return Err(EndpointError::Parse(format!(
                        "argument '{name}' supplied both positionally and by name"
                    )));
                }
                values.insert(name.to_string(), it.next().unwrap_or_default());
            }
        }
        _ => {
            return Err(EndpointError::Parse(format!(
                "too many arguments for '{tag}' endpoint"
            )));
        }
    }
    Ok(())
}

fn client_keywords(
    tag: &str,
    descriptor: EndpointDescriptor,
    names: &[&str],
) -> EndpointResult<HashMap<String, String>> {
    let EndpointDescriptor {
        positional, keyword, ..
    } = descriptor;
    let mut values = HashMap::new();
    for (key, value) in keyword {
        if !names.contains(&key.as_str()) {
            return Err(EndpointError::Parse(format!(
                "unknown argument '{key}' for '{tag}' endpoint"
            )));
        }
        values.insert(key, value);
    }
    assign_host_port(tag, &mut values, positional)?;
    Ok(values)
}

fn parse_timeout(values: &HashMap<String, String>) -> EndpointResult<Option<Duration>> {
    values
        .get("timeout")
        .map(|v| parse_u32("timeout", v).map(|secs| Duration::from_secs(secs.into())))
        .transpose()
}

fn parse_bind_address(
    values: &HashMap<String, String>,
) -> EndpointResult<Option<std::net::SocketAddr>> {
    values
        .get("bindAddress")
        .map(|v| {
            v.parse::<std::net::IpAddr>()
                .map(|ip| std::net::SocketAddr::new(ip, 0))
                .map_err(|_| {
                    EndpointError::Parse(format!("invalid value for bindAddress: '{v}'"))
                })
        })
        .transpose()
}

fn parse_tcp_client(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
) -> EndpointResult<Box<dyn ClientEndpoint>> {
    let values = client_keywords(
        "tcp",
        descriptor,
        &["host", "port", "timeout", "bindAddress"],
    )?;
    let host = required(&values, "tcp", "host")?;
    let port = parse_port("port", required(&values, "tcp", "port")?)?;
    let mut endpoint = TcpClientEndpoint::new(driver, host, port);
    if let Some(timeout) = parse_timeout(&values)? {
        endpoint = endpoint.timeout(timeout);
    }
    if let Some(bind) = parse_bind_address(&values)? {
        endpoint = endpoint.bind_address(bind);
    }
    Ok(Box::new(endpoint))
}

fn parse_tls_client(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
) -> EndpointResult<Box<dyn ClientEndpoint>> {
    let values = client_keywords(
        "ssl",
        descriptor,
        &[
            "host",
            "port",
            "privateKey",
            "certKey",
            "caCertsDir",
            "timeout",
            "bindAddress",
        ],
    )?;
    let host = required(&values, "ssl", "host")?;
    let port = parse_port("port", required(&values, "ssl", "port")?)?;
    let identity = match values.get("privateKey") {
        Some(key) => {
            let cert = values.get("certKey").unwrap_or(key);
            Some((key.clone(), cert.clone()))
        }
        None => None,
    };
    let certificates = CertificateBundle::for_client(
        identity
            .as_ref()
            .map(|(key, cert)| (Path::new(key), Path::new(cert))),
        values.get("caCertsDir").map(Path::new),
    )?;
    let mut endpoint = TlsClientEndpoint::new(driver, host, port).certificates(certificates);
    if let Some(timeout) = parse_timeout(&values)? {
        endpoint = endpoint.timeout(timeout);
    }
    if let Some(bind) = parse_bind_address(&values)? {
        endpoint = endpoint.bind_address(bind);
    }
    Ok(Box::new(endpoint))
}

fn parse_unix_client(
    driver: Arc<dyn IoDriver>,
    descriptor: EndpointDescriptor,
) -> EndpointResult<Box<dyn ClientEndpoint>> {
    let tag = descriptor.type_tag.clone();
    let values = bind_arguments(&tag, descriptor, &["path", "timeout", "lockfile", "checkPID"])?;
    let path = required(&values, "unix", "path")?;
    let mut endpoint = UnixClientEndpoint::new(driver, path);
    if let Some(timeout) = parse_timeout(&values)? {
        endpoint = endpoint.timeout(timeout);
    }
    if let Some(flag) = values.get("lockfile").or_else(|| values.get("checkPID")) {
        endpoint = endpoint.check_peer_pid(parse_flag("lockfile", flag)?);
    }
    Ok(Box::new(endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDriver, MemoryProtocolFactory};

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new().with_listen_fds(ListenFds::from_descriptors(vec![]))
    }

    fn driver() -> Arc<MemoryDriver> {
        Arc::new(MemoryDriver::new())
    }

    fn erased(driver: &Arc<MemoryDriver>) -> Arc<dyn IoDriver> {
        Arc::clone(driver) as Arc<dyn IoDriver>
    }

    #[tokio::test]
    async fn test_tcp_server_description() {
        let driver = driver();
        let endpoint = registry()
            .server_from_string(erased(&driver), "tcp:8080:interface=127.0.0.1:backlog=10")
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        assert_eq!(state.stream_listens[0].port, 8080);
        assert_eq!(state.stream_listens[0].interface, "127.0.0.1");
        assert_eq!(state.stream_listens[0].backlog, 10);
        assert_eq!(state.stream_listens[0].family, AddressFamily::Inet);
    }

    #[tokio::test]
    async fn test_tcp6_server_description() {
        let driver = driver();
        let endpoint = registry()
            .server_from_string(erased(&driver), r"tcp6:8080:interface=fe80\:\:1")
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        assert_eq!(state.stream_listens[0].family, AddressFamily::Inet6);
        assert_eq!(state.stream_listens[0].interface, "fe80::1");
    }

    #[test]
    fn test_unknown_type_error_is_verbatim() {
        let err = registry()
            .server_from_string(erased(&driver()), "bogus-type:hello")
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown endpoint type: 'bogus-type'");
    }

    #[test]
    fn test_bare_port_is_rejected_as_unqualified() {
        let err = registry()
            .server_from_string(erased(&driver()), "4321")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unqualified strport description passed to 'service'.\
             Use qualified endpoint descriptions; for example, 'tcp:4321'."
        );
    }

    #[tokio::test]
    async fn test_default_tag_applies_to_unqualified_descriptions() {
        let driver = driver();
        let endpoint = registry()
            .server_from_string_with_default(
                erased(&driver),
                "4321:interface=10.0.0.1",
                Some("tcp"),
            )
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        assert_eq!(state.stream_listens[0].port, 4321);
        assert_eq!(state.stream_listens[0].interface, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_default_tag_does_not_shadow_qualified_descriptions() {
        let driver = driver();
        let endpoint = registry()
            .server_from_string_with_default(erased(&driver), "unix:/tmp/sock", Some("tcp"))
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(driver.state().unix_listens[0].path, Path::new("/tmp/sock"));
    }

    #[test]
    fn test_no_default_rejects_unqualified() {
        let err = registry()
            .server_from_string_with_default(erased(&driver()), "4321", None)
            .unwrap_err();
        assert!(err.to_string().starts_with("Unqualified strport"));
    }

    #[tokio::test]
    async fn test_unix_server_mode_and_lockfile() {
        let driver = driver();
        let endpoint = registry()
            .server_from_string(
                erased(&driver),
                "unix:/var/run/finger:mode=660:lockfile=0",
            )
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        assert_eq!(state.unix_listens[0].mode, 0o660);
        assert!(!state.unix_listens[0].want_peer_pid);
    }

    #[tokio::test]
    async fn test_stdio_server_description() {
        let driver = driver();
        let endpoint = registry()
            .server_from_string(erased(&driver), "stdio:")
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(driver.state().stdio_listens, 1);
    }

    #[tokio::test]
    async fn test_systemd_server_description() {
        let driver = driver();
        let registry = EndpointRegistry::new()
            .with_listen_fds(ListenFds::from_descriptors(vec![7, 8, 9]));
        let endpoint = registry
            .server_from_string(erased(&driver), "systemd:domain=INET6:index=2")
            .unwrap();
        // The endpoint would adopt fd 9; don't listen, just check the
        // index resolution by asking for a missing one.
        drop(endpoint);
        let err = registry
            .server_from_string(erased(&driver), "systemd:domain=INET:index=5")
            .unwrap_err();
        assert!(matches!(err, EndpointError::Parse(_)));
    }

    #[tokio::test]
    async fn test_tcp_client_host_then_port() {
        let driver = driver();
        let endpoint = registry()
            .client_from_string(erased(&driver), "tcp:10.0.0.2:1234:timeout=7")
            .unwrap();
        endpoint
            .connect(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        assert_eq!(
            state.stream_connects[0].addr,
            "10.0.0.2:1234".parse().unwrap()
        );
        assert_eq!(state.stream_connects[0].timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_tcp_client_keyword_host_positional_port() {
        let driver = driver();
        let endpoint = registry()
            .client_from_string(erased(&driver), "tcp:host=10.0.0.3:1234")
            .unwrap();
        endpoint
            .connect(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(
            driver.state().stream_connects[0].addr,
            "10.0.0.3:1234".parse().unwrap()
        );
    }

    #[tokio::test]
    async fn test_tcp_client_positional_host_keyword_port() {
        let driver = driver();
        let endpoint = registry()
            .client_from_string(erased(&driver), "tcp:10.0.0.4:port=443")
            .unwrap();
        endpoint
            .connect(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(
            driver.state().stream_connects[0].addr,
            "10.0.0.4:443".parse().unwrap()
        );
    }

    #[test]
    fn test_tcp_client_missing_port_is_an_error() {
        let err = registry()
            .client_from_string(erased(&driver()), "tcp:10.0.0.5")
            .unwrap_err();
        assert!(matches!(err, EndpointError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unix_client_lockfile_spelling() {
        let driver = driver();
        let endpoint = registry()
            .client_from_string(erased(&driver), "unix:path=/tmp/sock:lockfile=1")
            .unwrap();
        endpoint
            .connect(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert!(driver.state().unix_connects[0].check_peer_pid);
    }

    #[tokio::test]
    async fn test_ssl_server_defaults_key_to_server_pem() {
        // The default key path does not exist here, so construction fails
        // while trying to read it; the path is in the message.
        let err = registry()
            .server_from_string(erased(&driver()), "ssl:443")
            .unwrap_err();
        assert!(err.to_string().contains("server.pem"));
    }

    #[tokio::test]
    async fn test_ssl_server_cert_key_defaults_to_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("combined.pem");
        std::fs::write(&key, b"key and cert").unwrap();

        let driver = driver();
        let description = format!("ssl:443:privateKey={}", key.display());
        let endpoint = registry()
            .server_from_string(erased(&driver), &description)
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        let bundle = &state.tls_listens[0].certificates;
        assert_eq!(bundle.private_key(), Some(b"key and cert".as_slice()));
        assert_eq!(bundle.certificate(), Some(b"key and cert".as_slice()));
    }

    #[tokio::test]
    async fn test_ssl_client_ca_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pem"), b"anchor b").unwrap();
        std::fs::write(dir.path().join("a.pem"), b"anchor a").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"not pem").unwrap();

        let driver = driver();
        let description = format!("ssl:10.0.0.6:443:caCertsDir={}", dir.path().display());
        let endpoint = registry()
            .client_from_string(erased(&driver), &description)
            .unwrap();
        endpoint
            .connect(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let state = driver.state();
        let bundle = &state.tls_connects[0].certificates;
        assert!(bundle.verifies_peer());
        assert_eq!(
            bundle.trust_anchors(),
            &[b"anchor a".to_vec(), b"anchor b".to_vec()]
        );
    }

    #[test]
    fn test_unknown_keyword_is_an_error() {
        let err = registry()
            .server_from_string(erased(&driver()), "tcp:8080:color=red")
            .unwrap_err();
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_duplicate_assignment_is_an_error() {
        let err = registry()
            .server_from_string(erased(&driver()), "tcp:8080:port=9090")
            .unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[derive(Debug)]
    struct FakeParser;

    impl EndpointStringParser for FakeParser {
        fn prefix(&self) -> &str {
            "fake"
        }

        fn parse_stream_server(
            &self,
            driver: Arc<dyn IoDriver>,
            positional: &[String],
            _keyword: &HashMap<String, String>,
        ) -> EndpointResult<Box<dyn ServerEndpoint>> {
            let port = parse_port("port", &positional[0])?;
            Ok(Box::new(TcpServerEndpoint::new(driver, port)))
        }
    }

    #[tokio::test]
    async fn test_plugin_parser_is_consulted_for_its_prefix() {
        let driver = driver();
        let mut registry = registry();
        registry.register(Arc::new(FakeParser));
        let endpoint = registry
            .server_from_string(erased(&driver), "fake:6116")
            .unwrap();
        endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(driver.state().stream_listens[0].port, 6116);
    }

    #[test]
    fn test_plugin_without_client_support_rejects_clients() {
        let mut registry = registry();
        registry.register(Arc::new(FakeParser));
        let err = registry
            .client_from_string(erased(&driver()), "fake:6116")
            .unwrap_err();
        assert!(matches!(err, EndpointError::Parse(_)));
    }
}
