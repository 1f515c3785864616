//! Command-line configuration for the server binary.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use clap::Parser;

pub const MIN_PORT: u16 = 1024;
pub const DEFAULT_PORT: u16 = 31337;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MAX_TIMEOUT_SECS: u64 = 60;
pub const BACKLOG: u32 = 1024;

#[derive(Debug, Parser)]
#[command(name = "capesrv", about = "CAPE remote file service")]
struct Cli {
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    #[arg(short = 'd', long = "dir")]
    home_directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub timeout_secs: u64,
    pub home_directory: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    PortOutOfRange(u16),
    TimeoutOutOfRange(u64),
    HomeNotFound(PathBuf),
    HomeNotDir(PathBuf),
    HomeNotReadWrite(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::PortOutOfRange(p) => {
                write!(f, "port {} out of range [{}, 65535]", p, MIN_PORT)
            }
            ConfigError::TimeoutOutOfRange(t) => {
                write!(f, "timeout {} out of range [1, {}]", t, MAX_TIMEOUT_SECS)
            }
            ConfigError::HomeNotFound(p) => write!(f, "home directory {:?} does not exist", p),
            ConfigError::HomeNotDir(p) => write!(f, "home directory {:?} is not a directory", p),
            ConfigError::HomeNotReadWrite(p) => {
                write!(f, "home directory {:?} must have read and write permissions", p)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Parses `std::env::args` and validates the result, returning a ready-to-use config.
    pub fn from_args() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        Self::validate(cli.port, cli.timeout, cli.home_directory)
    }

    fn validate(
        port: u16,
        timeout_secs: u64,
        home_directory: PathBuf,
    ) -> Result<Self, ConfigError> {
        if port < MIN_PORT {
            return Err(ConfigError::PortOutOfRange(port));
        }
        if timeout_secs == 0 || timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::TimeoutOutOfRange(timeout_secs));
        }
        if !home_directory.exists() {
            return Err(ConfigError::HomeNotFound(home_directory));
        }
        let meta = std::fs::metadata(&home_directory)
            .map_err(|_| ConfigError::HomeNotFound(home_directory.clone()))?;
        if !meta.is_dir() {
            return Err(ConfigError::HomeNotDir(home_directory));
        }
        let mode = meta.permissions().mode();
        if mode & 0o400 == 0 || mode & 0o200 == 0 {
            return Err(ConfigError::HomeNotReadWrite(home_directory));
        }
        Ok(ServerConfig {
            port,
            timeout_secs,
            home_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_low_port() {
        let err = ServerConfig::validate(80, 10, PathBuf::from("/tmp")).unwrap_err();
        assert!(matches!(err, ConfigError::PortOutOfRange(80)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = ServerConfig::validate(31337, 0, PathBuf::from("/tmp")).unwrap_err();
        assert!(matches!(err, ConfigError::TimeoutOutOfRange(0)));
    }

    #[test]
    fn rejects_missing_home() {
        let err =
            ServerConfig::validate(31337, 10, PathBuf::from("/no/such/dir/for/cape")).unwrap_err();
        assert!(matches!(err, ConfigError::HomeNotFound(_)));
    }

    #[test]
    fn accepts_valid_config() {
        let cfg = ServerConfig::validate(31337, 10, PathBuf::from("/tmp")).unwrap();
        assert_eq!(cfg.port, 31337);
        assert_eq!(cfg.timeout_secs, 10);
    }

    #[test]
    fn rejects_unwritable_home() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut perms = std::fs::metadata(dir.path()).unwrap().permissions();
        perms.set_mode(0o500); // read + execute, no write
        std::fs::set_permissions(dir.path(), perms).unwrap();

        let err = ServerConfig::validate(31337, 10, dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, ConfigError::HomeNotReadWrite(_)));

        // restore permissions so TempDir can clean itself up
        let mut perms = std::fs::metadata(dir.path()).unwrap().permissions();
        perms.set_mode(0o700);
        std::fs::set_permissions(dir.path(), perms).unwrap();
    }
}
