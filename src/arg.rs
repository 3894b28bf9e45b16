use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;
use std::time::Duration;

use clap::{
    App,
    Arg,
    ArgMatches,
};
use figment::Figment;
use figment::providers::{
    Env,
    Format,
    Serialized,
    Toml,
};
use serde::{
    Deserialize,
    Serialize,
};

use log::{debug, info};

use crate::error::{
    ProxyError,
    ProxyResult,
};

const BIND_HOST: &str = "0.0.0.0";
const BIND_PORT: u16 = 8082;
const CACHE_ROOT: &str = "/tmp/nicache";
const MAX_DIRECTORY_SIZE: usize = 1000;
const WORKERS: usize = 2;
const HTTP_CONNECTION_TIMEOUT: u64 = 30;

/// Prefix of environment variables overriding configuration keys.
pub const ENV_PREFIX: &str = "NIPROXY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub cache_root: PathBuf,
    /// Wipe the cache directory at startup.
    pub purge_cache: bool,
    pub max_directory_size: usize,
    pub workers: usize,
    /// Outbound forwarding timeout in seconds, 0 for none.
    pub http_connection_timeout: u64,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            host: BIND_HOST.to_string(),
            port: BIND_PORT,
            cache_root: PathBuf::from(CACHE_ROOT),
            purge_cache: true,
            max_directory_size: MAX_DIRECTORY_SIZE,
            workers: WORKERS,
            http_connection_timeout: HTTP_CONNECTION_TIMEOUT,
        }
    }
}

fn parse_arg<T: FromStr>(arg: &ArgMatches, key: &str) -> ProxyResult<Option<T>> {
    match arg.value_of(key) {
        Some(v) => {
            match T::from_str(v) {
                Ok(r) => Ok(Some(r)),
                Err(_) => Err(ProxyError::Configuration(format!("invalid value for {}: {}", key, v))),
            }
        },
        None => Ok(None),
    }
}

impl Settings {
    /// Defaults, overlaid with the TOML file at `config` if given, then with
    /// `NIPROXY_*` environment variables.
    pub fn load(config: Option<&Path>) -> ProxyResult<Settings> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(p) = config {
            if !p.is_file() {
                return Err(ProxyError::Configuration(format!("config file {:?} not found", p)));
            }
            info!("loading configuration from {:?}", p);
            figment = figment.merge(Toml::file(p));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ProxyError::Configuration(e.to_string()))
    }

    pub fn app() -> App<'static, 'static> {
        let mut o = App::new("niproxy");
        o = o.version(env!("CARGO_PKG_VERSION"));
        o = o.about("NetInf publish and retrieve proxy");
        o = o.arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("TOML configuration file")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("host")
                .long("host")
                .value_name("Host or ip to bind server to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .value_name("Port to bind server to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("cache_root")
                .long("cache-dir")
                .short("d")
                .value_name("Directory to store published content in")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("keep_cache")
                .long("keep-cache")
                .help("Do not wipe the cache directory at startup")
                );
        o = o.arg(
            Arg::with_name("max_directory_size")
                .long("max-directory-size")
                .value_name("Maximum number of published names")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("workers")
                .long("workers")
                .short("w")
                .value_name("Number of request worker threads")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("http_connection_timeout")
                .long("timeout")
                .short("t")
                .value_name("Forwarding timeout in seconds, 0 for none")
                .takes_value(true)
                );
        o
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) -> ProxyResult<()> {
        if let Some(v) = arg.value_of("host") {
            self.host = v.to_string();
        }
        if let Some(v) = parse_arg(arg, "port")? {
            self.port = v;
        }
        if let Some(v) = arg.value_of("cache_root") {
            self.cache_root = PathBuf::from(v);
        }
        if arg.is_present("keep_cache") {
            self.purge_cache = false;
        }
        if let Some(v) = parse_arg(arg, "max_directory_size")? {
            self.max_directory_size = v;
        }
        if let Some(v) = parse_arg(arg, "workers")? {
            self.workers = v;
        }
        if let Some(v) = parse_arg(arg, "http_connection_timeout")? {
            self.http_connection_timeout = v;
        }
        Ok(())
    }

    pub fn from_matches(arg: &ArgMatches) -> ProxyResult<Settings> {
        let config = arg.value_of("config").map(Path::new);
        let mut settings = Settings::load(config)?;
        settings.bind_from_args(arg)?;
        settings.validate()?;
        debug!("settings {:?}", &settings);
        Ok(settings)
    }

    pub fn from_args() -> ProxyResult<Settings> {
        let arg_matches = Settings::app().get_matches();
        Settings::from_matches(&arg_matches)
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if self.workers == 0 {
            return Err(ProxyError::Configuration(String::from("at least one worker is needed")));
        }
        if self.max_directory_size == 0 {
            return Err(ProxyError::Configuration(String::from("directory size must be positive")));
        }
        if self.cache_root.as_os_str().is_empty() {
            return Err(ProxyError::Configuration(String::from("no cache directory given")));
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        match self.http_connection_timeout {
            0 => None,
            v => Some(Duration::from_secs(v)),
        }
    }
}
