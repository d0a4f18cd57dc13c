//! XML configuration file
//!
//! One file carries both the client environment (host id, outbox, task
//! journal, rules, partners) and zero or more `<spooled>` daemon entries
//! under `/config/spooleddaemon`.

use r66_client::{DEFAULT_TIMEOUTCON_MS, RuleMode, StaticRuleCatalog};
use r66_spool::{SpoolConfig, TransferMode};
use roxmltree::{Document, Node};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Host id used when `/config/identity/hostid` is absent
pub const DEFAULT_HOST_ID: &str = "spooled";

/// Configuration loading errors. All map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file cannot be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Configuration file is not well-formed XML
    #[error("malformed XML in {path}: {source}")]
    Xml {
        /// File path
        path: PathBuf,
        /// Parser error
        source: roxmltree::Error,
    },

    /// Root element is not `<config>`
    #[error("root element must be <config>, found <{0}>")]
    Root(String),

    /// Element value has the wrong type
    #[error("invalid value {value:?} for <{field}>")]
    Value {
        /// Element name
        field: String,
        /// Offending text
        value: String,
    },

    /// Single-instance mode without its mandatory flags
    #[error("missing mandatory arguments: {0}")]
    Missing(String),

    /// Two daemons would share a status file
    #[error("status file {0} is used by more than one daemon")]
    SharedStatusFile(PathBuf),

    /// Collaborator cannot be built from the environment
    #[error("{0}")]
    Environment(String),
}

/// Collaborator settings read from the configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEnvironment {
    /// Own host id
    pub host_id: String,
    /// Connection timeout (`TIMEOUTCON`)
    pub timeout: Duration,
    /// Default block size for flag mode
    pub block_size: Option<u32>,
    /// Outbox root of the transfer client
    pub outbox: Option<PathBuf>,
    /// Task journal; absent means no task database
    pub journal: Option<PathBuf>,
    /// Declared rules
    pub rules: Vec<(String, RuleMode)>,
    /// Known partners
    pub hosts: Vec<String>,
}

impl Default for ClientEnvironment {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUTCON_MS),
            block_size: None,
            outbox: None,
            journal: None,
            rules: Vec::new(),
            hosts: Vec::new(),
        }
    }
}

impl ClientEnvironment {
    /// Rule catalog built from the declared rules and partners.
    pub fn catalog(&self) -> StaticRuleCatalog {
        let catalog = self
            .rules
            .iter()
            .fold(StaticRuleCatalog::new(&self.host_id), |c, (name, mode)| {
                c.with_rule(name, *mode)
            });
        self.hosts
            .iter()
            .fold(catalog, |c, host| c.with_partner(host))
    }
}

/// Decoded configuration file
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Client environment
    pub environment: ClientEnvironment,
    /// Complete `<spooled>` entries
    pub daemons: Vec<SpoolConfig>,
}

/// Read and decode `path`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or decoded.
pub fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|e| match e {
        ConfigError::Xml { source, .. } => ConfigError::Xml {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Decode a configuration document.
///
/// # Errors
///
/// Returns a [`ConfigError`] on malformed XML or ill-typed values.
pub fn parse(text: &str) -> Result<ConfigFile, ConfigError> {
    let doc = Document::parse(text).map_err(|source| ConfigError::Xml {
        path: PathBuf::new(),
        source,
    })?;
    let root = doc.root_element();
    if root.tag_name().name() != "config" {
        return Err(ConfigError::Root(root.tag_name().name().to_string()));
    }

    let environment = parse_environment(root)?;
    let daemons = match child(root, "spooleddaemon") {
        Some(node) => parse_daemons(node, &environment)?,
        None => Vec::new(),
    };
    Ok(ConfigFile {
        environment,
        daemons,
    })
}

fn parse_environment(root: Node<'_, '_>) -> Result<ClientEnvironment, ConfigError> {
    let mut env = ClientEnvironment::default();

    if let Some(host_id) = child(root, "identity").and_then(|n| text(n, "hostid")) {
        env.host_id = host_id.to_string();
    }
    if let Some(network) = child(root, "network") {
        if let Some(ms) = number::<u64>(network, "timeoutcon")? {
            env.timeout = Duration::from_millis(ms);
        }
        env.block_size = number(network, "blocksize")?;
    }
    env.outbox = text(root, "outbox").map(PathBuf::from);
    env.journal = child(root, "db")
        .and_then(|n| text(n, "journal"))
        .map(PathBuf::from);

    if let Some(rules) = child(root, "rules") {
        for rule in children(rules, "rule") {
            let (Some(name), Some(mode)) = (text(rule, "idrule"), text(rule, "mode")) else {
                tracing::warn!("Rule entry without idrule or mode ignored");
                continue;
            };
            let mode = RuleMode::from_str(mode).map_err(|_| ConfigError::Value {
                field: "mode".into(),
                value: mode.into(),
            })?;
            env.rules.push((name.to_string(), mode));
        }
    }
    if let Some(hosts) = child(root, "hosts") {
        env.hosts = children(hosts, "host")
            .filter_map(|h| text(h, "hostid"))
            .map(String::from)
            .collect();
    }
    Ok(env)
}

fn parse_daemons(
    node: Node<'_, '_>,
    env: &ClientEnvironment,
) -> Result<Vec<SpoolConfig>, ConfigError> {
    let entries: Vec<Node<'_, '_>> = children(node, "spooled").collect();
    let Some(stop_file) = text(node, "stopfile") else {
        if !entries.is_empty() {
            tracing::warn!("<spooleddaemon> has no <stopfile>, {} entries ignored", entries.len());
        }
        return Ok(Vec::new());
    };

    let mut daemons = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_spooled(entry, stop_file, env)? {
            Some(config) => daemons.push(config),
            None => tracing::warn!("<spooled> entry {} is incomplete, skipped", index + 1),
        }
    }
    Ok(daemons)
}

fn parse_spooled(
    node: Node<'_, '_>,
    stop_file: &str,
    env: &ClientEnvironment,
) -> Result<Option<SpoolConfig>, ConfigError> {
    let hosts = list(node, "to");
    let directories: Vec<PathBuf> = list(node, "directory").into_iter().map(PathBuf::from).collect();
    let (Some(rule), Some(status_file)) = (text(node, "rule"), text(node, "statusfile")) else {
        return Ok(None);
    };
    let Some(elapse_waarp) = number::<u64>(node, "elapseWaarp")? else {
        return Ok(None);
    };
    if hosts.is_empty() || directories.is_empty() {
        return Ok(None);
    }

    let mut config = SpoolConfig::new(directories, status_file, stop_file, rule, hosts);
    config.name = match text(node, "name") {
        Some(name) => name.to_string(),
        None => SpoolConfig::default_name(&env.host_id, &config.directories),
    };
    config.elapse_waarp = Duration::from_millis(elapse_waarp);
    config.waarp_hosts = list(node, "waarp");
    config.regex = text(node, "regex").map(String::from);
    config.shutdown_timeout = env.timeout;

    if let Some(recursive) = boolean(node, "recursive")? {
        config.recursive = recursive;
    }
    if let Some(ms) = number::<u64>(node, "elapse")? {
        config.elapse = Duration::from_millis(ms);
    }
    if let Some(submit) = boolean(node, "submit")? {
        config.mode = if submit {
            TransferMode::Submit
        } else {
            TransferMode::Direct
        };
    }
    if let Some(parallel) = boolean(node, "parallel")? {
        config.parallel = parallel;
    }
    if let Some(limit) = number(node, "limitParallel")? {
        config.limit_parallel = limit;
    }
    if let Some(info) = text(node, "info") {
        config.file_info = info.to_string();
    }
    if let Some(md5) = boolean(node, "md5")? {
        config.md5 = md5;
    }
    if let Some(block) = number(node, "block")? {
        config.block_size = block;
    }
    if let Some(nolog) = boolean(node, "nolog")? {
        config.nolog = nolog;
    }
    Ok(Some(config))
}

/// Reject configurations where two daemons write the same status file.
///
/// # Errors
///
/// Returns [`ConfigError::SharedStatusFile`] naming the first duplicate.
pub fn check_distinct_status_files(configs: &[SpoolConfig]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for config in configs {
        if !seen.insert(&config.status_file) {
            return Err(ConfigError::SharedStatusFile(config.status_file.clone()));
        }
    }
    Ok(())
}

/// Split a comma separated list, dropping blank items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn children<'a, 'i: 'a>(
    node: Node<'a, 'i>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Every `<name>` child, each one possibly a comma separated list.
fn list(node: Node<'_, '_>, name: &str) -> Vec<String> {
    children(node, name)
        .filter_map(|n| n.text())
        .flat_map(split_list)
        .collect()
}

fn number<T: FromStr>(node: Node<'_, '_>, name: &str) -> Result<Option<T>, ConfigError> {
    text(node, name)
        .map(|raw| {
            raw.parse().map_err(|_| ConfigError::Value {
                field: name.to_string(),
                value: raw.to_string(),
            })
        })
        .transpose()
}

fn boolean(node: Node<'_, '_>, name: &str) -> Result<Option<bool>, ConfigError> {
    text(node, name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Value {
                field: name.to_string(),
                value: raw.to_string(),
            }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use r66_client::RuleCatalog;

    const FULL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<config>
  <identity><hostid>hosta</hostid></identity>
  <network>
    <timeoutcon>5000</timeoutcon>
    <blocksize>8192</blocksize>
  </network>
  <outbox>/var/r66/out</outbox>
  <db><journal>/var/r66/tasks.jsonl</journal></db>
  <rules>
    <rule><idrule>send</idrule><mode>send</mode></rule>
    <rule><idrule>get</idrule><mode>2</mode></rule>
  </rules>
  <hosts>
    <host><hostid>hostb</hostid></host>
  </hosts>
  <spooleddaemon>
    <stopfile>/var/spool/stop</stopfile>
    <spooled>
      <name>inbound</name>
      <to>hostb</to>
      <to>hostc, hostd</to>
      <rule>send</rule>
      <statusfile>/var/spool/a.status</statusfile>
      <directory>/var/spool/a</directory>
      <recursive>yes</recursive>
      <elapse>2000</elapse>
      <submit>false</submit>
      <parallel>0</parallel>
      <md5>true</md5>
      <block>4096</block>
      <waarp>hostb</waarp>
      <elapseWaarp>3000</elapseWaarp>
    </spooled>
    <spooled>
      <to>hostb</to>
      <rule>send</rule>
      <statusfile>/var/spool/b.status</statusfile>
      <directory>/var/spool/b1</directory>
      <directory>/var/spool/b2</directory>
      <elapseWaarp>5000</elapseWaarp>
    </spooled>
    <spooled>
      <to>hostb</to>
      <rule>send</rule>
      <directory>/var/spool/c</directory>
      <elapseWaarp>5000</elapseWaarp>
    </spooled>
  </spooleddaemon>
</config>"#;

    #[test]
    fn test_parse_environment() {
        let file = parse(FULL).unwrap();
        let env = &file.environment;
        assert_eq!(env.host_id, "hosta");
        assert_eq!(env.timeout, Duration::from_millis(5000));
        assert_eq!(env.block_size, Some(8192));
        assert_eq!(env.outbox, Some(PathBuf::from("/var/r66/out")));
        assert_eq!(env.journal, Some(PathBuf::from("/var/r66/tasks.jsonl")));
        assert_eq!(env.rules.len(), 2);
        assert_eq!(env.hosts, vec!["hostb"]);

        let catalog = env.catalog();
        assert!(catalog.rule("get").unwrap().mode.is_recv());
        assert_eq!(catalog.requester_of("hostb").unwrap(), "hosta");
    }

    #[test]
    fn test_parse_daemons() {
        let file = parse(FULL).unwrap();
        // Third entry has no status file
        assert_eq!(file.daemons.len(), 2);

        let a = &file.daemons[0];
        assert_eq!(a.name, "inbound");
        assert_eq!(a.remote_hosts, vec!["hostb", "hostc", "hostd"]);
        assert_eq!(a.stop_file, PathBuf::from("/var/spool/stop"));
        assert!(a.recursive);
        assert_eq!(a.elapse, Duration::from_millis(2000));
        assert_eq!(a.mode, TransferMode::Direct);
        assert!(!a.parallel);
        assert!(a.md5);
        assert_eq!(a.block_size, 4096);
        assert_eq!(a.waarp_hosts, vec!["hostb"]);
        assert_eq!(a.elapse_waarp, Duration::from_millis(3000));
        assert_eq!(a.shutdown_timeout, Duration::from_millis(5000));

        let b = &file.daemons[1];
        assert_eq!(b.name, "hosta : /var/spool/b1,/var/spool/b2");
        assert_eq!(b.mode, TransferMode::Submit);
        assert_eq!(b.directories.len(), 2);
        assert_eq!(b.stop_file, PathBuf::from("/var/spool/stop"));
    }

    #[test]
    fn test_missing_stopfile_yields_no_daemon() {
        let xml = r#"<config><spooleddaemon>
            <spooled><to>b</to><rule>r</rule><statusfile>s</statusfile>
            <directory>d</directory><elapseWaarp>2000</elapseWaarp></spooled>
        </spooleddaemon></config>"#;
        let file = parse(xml).unwrap();
        assert!(file.daemons.is_empty());
        assert_eq!(file.environment, ClientEnvironment::default());
    }

    #[test]
    fn test_missing_elapse_waarp_skips_entry() {
        let xml = r#"<config><spooleddaemon><stopfile>stop</stopfile>
            <spooled><to>b</to><rule>r</rule><statusfile>s</statusfile>
            <directory>d</directory></spooled>
        </spooleddaemon></config>"#;
        assert!(parse(xml).unwrap().daemons.is_empty());
    }

    #[test]
    fn test_bad_values() {
        let bad_bool = r#"<config><spooleddaemon><stopfile>stop</stopfile>
            <spooled><to>b</to><rule>r</rule><statusfile>s</statusfile>
            <directory>d</directory><elapseWaarp>2000</elapseWaarp>
            <md5>maybe</md5></spooled>
        </spooleddaemon></config>"#;
        assert!(matches!(parse(bad_bool), Err(ConfigError::Value { field, .. }) if field == "md5"));

        let bad_mode = "<config><rules><rule><idrule>x</idrule><mode>sideways</mode></rule></rules></config>";
        assert!(matches!(parse(bad_mode), Err(ConfigError::Value { .. })));

        assert!(matches!(parse("<other/>"), Err(ConfigError::Root(_))));
        assert!(matches!(parse("<config>"), Err(ConfigError::Xml { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/spooled.xml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_shared_status_file_rejected() {
        let file = parse(FULL).unwrap();
        let mut configs = file.daemons.clone();
        check_distinct_status_files(&configs).unwrap();
        configs[1].status_file = configs[0].status_file.clone();
        assert!(matches!(
            check_distinct_status_files(&configs),
            Err(ConfigError::SharedStatusFile(_))
        ));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a", "b"]);
        assert!(split_list("").is_empty());
    }
}
