//! Jupyter servers attached to jobs.
//!
//! A server is its own job sharing the files of the job it serves. It is
//! named after that job, so stopping it or asking for its url only needs the
//! job id.

use std::fmt;
use std::str::FromStr;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::drivers::{JobInfo, JobState};

/// First host port tried when the port is picked automatically.
pub const FIRST_AUTO_PORT: u16 = 7019;

const NAME_PREFIX: &str = "JUPYTER-";

/// `--server-port`: `auto` or a fixed port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerPort {
    #[default]
    Auto,
    Fixed(u16),
}

impl FromStr for ServerPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(ServerPort::Auto),
            other => other
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .map(ServerPort::Fixed)
                .ok_or_else(|| format!("invalid server port '{}' (expected auto or a port number)", s)),
        }
    }
}

impl fmt::Display for ServerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerPort::Auto => write!(f, "auto"),
            ServerPort::Fixed(port) => write!(f, "{}", port),
        }
    }
}

/// How a server is published on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerOptions {
    pub port: ServerPort,
    /// Listen on every host interface instead of loopback only.
    pub expose: bool,
}

impl ServerOptions {
    pub fn address(&self) -> &'static str {
        if self.expose { "0.0.0.0" } else { "127.0.0.1" }
    }

    /// The fixed port, or the first port from [`FIRST_AUTO_PORT`] that no
    /// job has bound.
    pub fn host_port(&self, jobs: &[JobInfo]) -> u16 {
        match self.port {
            ServerPort::Fixed(port) => port,
            ServerPort::Auto => {
                let used: Vec<u16> = jobs
                    .iter()
                    .flat_map(|job| job.host_port_bindings.iter().copied())
                    .collect();
                (FIRST_AUTO_PORT..=u16::MAX)
                    .find(|port| !used.contains(port))
                    .unwrap_or(FIRST_AUTO_PORT)
            }
        }
    }
}

/// Container name of the server for job `id`.
pub fn server_name(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let hash: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", NAME_PREFIX, hash)
}

/// The running server of job `id`.
pub fn find_server<'a>(jobs: &'a [JobInfo], id: &str) -> Option<&'a JobInfo> {
    let name = server_name(id);
    jobs.iter()
        .filter(|job| job.status == JobState::Running)
        .find(|job| job.names.iter().any(|n| n.trim_start_matches('/') == name))
}

/// Shell command that starts `program` (`jupyter lab` or `jupyter notebook`)
/// listening on `port` inside the job.
pub fn server_command(program: &str, port: u16, args: &[String]) -> String {
    let mut parts = vec![
        program.to_string(),
        "--no-browser".to_string(),
        "--ip=0.0.0.0".to_string(),
        format!("--port={}", port),
    ];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

/// `jupyter lab list` or `jupyter notebook list`.
pub fn list_command(program: &str) -> Vec<String> {
    program
        .split_whitespace()
        .map(str::to_string)
        .chain(std::iter::once("list".to_string()))
        .collect()
}

/// First server url printed by a list command.
pub fn find_url(text: &str) -> Option<String> {
    let Ok(pattern) = Regex::new(r"https?://\S+") else {
        return None;
    };
    pattern.find(text).map(|m| m.as_str().to_string())
}

/// `url` with its host replaced by `host`; port, path and token are kept.
pub fn with_host(url: &str, host: &str) -> String {
    let Ok(pattern) = Regex::new(r"^(https?://)[^/:\s]+") else {
        return url.to_string();
    };
    pattern
        .replace(url, |caps: &Captures| format!("{}{}", &caps[1], host))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn job(id: &str, name: &str, status: &str, ports: Vec<u16>) -> JobInfo {
        JobInfo {
            id: id.into(),
            names: vec![name.into()],
            command: String::new(),
            status: JobState::from_status(status),
            status_string: status.into(),
            stack: String::new(),
            stack_name: String::new(),
            labels: BTreeMap::new(),
            host_port_bindings: ports,
        }
    }

    #[test]
    fn test_server_name_is_stable_per_job() {
        let name = server_name("abc123");
        assert!(name.starts_with("JUPYTER-"));
        assert_eq!(name.len(), "JUPYTER-".len() + 12);
        assert_eq!(name, server_name("abc123"));
        assert_ne!(name, server_name("abc124"));
    }

    #[test]
    fn test_find_server_ignores_stopped_servers() {
        let name = server_name("abc123");
        let jobs = vec![
            job("s1", &name, "Exited (0) 1 minute ago", vec![]),
            job("s2", &format!("/{}", name), "Up 2 minutes", vec![7019]),
        ];
        assert_eq!(find_server(&jobs, "abc123").map(|j| j.id.as_str()), Some("s2"));
        assert!(find_server(&jobs, "other").is_none());
    }

    #[test]
    fn test_auto_port_skips_bound_ports() {
        let jobs = vec![
            job("a", "a", "Up", vec![7019, 8080]),
            job("b", "b", "Up", vec![7020]),
        ];
        assert_eq!(ServerOptions::default().host_port(&jobs), 7021);
        assert_eq!(ServerOptions::default().host_port(&[]), FIRST_AUTO_PORT);
        let fixed = ServerOptions {
            port: ServerPort::Fixed(9000),
            expose: true,
        };
        assert_eq!(fixed.host_port(&jobs), 9000);
        assert_eq!(fixed.address(), "0.0.0.0");
    }

    #[test]
    fn test_server_port_parse() {
        assert_eq!("auto".parse::<ServerPort>(), Ok(ServerPort::Auto));
        assert_eq!("8888".parse::<ServerPort>(), Ok(ServerPort::Fixed(8888)));
        assert!("0".parse::<ServerPort>().is_err());
        assert!("lab".parse::<ServerPort>().is_err());
        assert_eq!(ServerPort::Fixed(7019).to_string(), "7019");
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            server_command("jupyter lab", 7019, &["--NotebookApp.token=x".into()]),
            "jupyter lab --no-browser --ip=0.0.0.0 --port=7019 --NotebookApp.token=x"
        );
        assert_eq!(list_command("jupyter notebook"), vec!["jupyter", "notebook", "list"]);
    }

    #[test]
    fn test_url_is_found_and_rehosted() {
        let listed = "Currently running servers:\nhttp://3f2a1b:7019/?token=abc :: /root/proj\n";
        let url = find_url(listed).unwrap();
        assert_eq!(url, "http://3f2a1b:7019/?token=abc");
        assert_eq!(with_host(&url, "10.0.0.5"), "http://10.0.0.5:7019/?token=abc");
        assert!(find_url("no servers").is_none());
    }
}
