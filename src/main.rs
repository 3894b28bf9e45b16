use std::process;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use env_logger;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;

use niproxy::arg::Settings;
use niproxy::cache::CacheStore;
use niproxy::directory::Directory;
use niproxy::dispatch::Dispatcher;
use niproxy::error::{
    ProxyError,
    ProxyResult,
};
use niproxy::forward::Forwarder;
use niproxy::server::ProxyServer;

use log::{info, error};

const SIGNAL_POLL: Duration = Duration::from_millis(200);

fn run(settings: &Settings) -> ProxyResult<()> {
    let cache = CacheStore::open(&settings.cache_root, settings.purge_cache)?;
    info!("using cache directory {:?}", cache.root());

    let term = Arc::new(AtomicBool::new(false));
    for sig in TERM_SIGNALS {
        flag::register(*sig, Arc::clone(&term))?;
    }

    let mut srv = ProxyServer::bind(settings)?;
    let mut forwarder = Forwarder::new(settings.connection_timeout());
    if let Some(v) = srv.listen_addr() {
        forwarder = forwarder.with_local_addr(v);
    }
    let directory = Directory::new(settings.max_directory_size);
    let dispatcher = Dispatcher::new(Arc::new(directory), Arc::new(cache), forwarder);
    srv.serve(Arc::new(dispatcher))?;
    info!("niproxy {} ready on {:?}", env!("CARGO_PKG_VERSION"), srv.listen_addr());

    while !term.load(Ordering::Relaxed) {
        thread::sleep(SIGNAL_POLL);
    }
    info!("shutting down");
    srv.shutdown()
}

fn main() {
    env_logger::init();

    let settings = match Settings::from_args() {
        Ok(v) => v,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            process::exit(1);
        },
    };

    match run(&settings) {
        Ok(_) => {},
        Err(ProxyError::Configuration(e)) => {
            error!("configuration error: {}", e);
            process::exit(1);
        },
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        },
    }
}
