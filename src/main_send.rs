use std::fs::File;
use std::io::{
    copy,
    stdout,
    Read,
    Write,
};
use std::path::Path;
use std::process;

use clap::{
    App,
    AppSettings,
    Arg,
    ArgMatches,
    SubCommand,
};
use env_logger;
use rand::Rng;
use thiserror::Error;
use ureq::{
    Agent,
    AgentBuilder,
};
use url::Url;

use niproxy::digest::{
    compute_digest_reader,
    HashAlgorithm,
    SHA256,
};
use niproxy::error::ProxyError;
use niproxy::multipart::FormBuilder;
use niproxy::name::{
    insert_hash,
    NATIVE_PREFIX,
    PUBLISH_PATH,
    RETRIEVE_PATH,
};

use log::{debug, info};

#[derive(Debug, Error)]
enum SendError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid proxy url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("proxy answered {0}")]
    Status(u16),

    #[error("invalid location list: {0}")]
    Json(#[from] serde_json::Error),
}

type SendResult<T> = Result<T, SendError>;

fn msgid() -> String {
    rand::thread_rng().gen::<u32>().to_string()
}

fn endpoint(args: &ArgMatches, path: &str) -> SendResult<Url> {
    let base = Url::parse(args.value_of("url").unwrap_or_default())?;
    Ok(base.join(path)?)
}

/// Send a request, treating any non-200 answer as failure.
fn check(r: Result<ureq::Response, ureq::Error>) -> SendResult<ureq::Response> {
    match r {
        Ok(v) if v.status() == 200 => Ok(v),
        Ok(v) => Err(SendError::Status(v.status())),
        Err(ureq::Error::Status(code, _)) => Err(SendError::Status(code)),
        Err(e) => Err(SendError::Http(e)),
    }
}

fn publish(ua: &Agent, args: &ArgMatches) -> SendResult<()> {
    let path = Path::new(args.value_of("file").unwrap_or_default());
    let authority = args.value_of("authority").unwrap_or_default();
    let alg: HashAlgorithm = args.value_of("algorithm").unwrap_or(SHA256).parse()?;

    let digest = compute_digest_reader(File::open(path)?, alg)?;
    let name = insert_hash(&format!("{}{}/{}", NATIVE_PREFIX, authority, alg.tag()), &digest)?;
    info!("publishing {:?} as {}", path, &name);

    let mut data = vec!();
    File::open(path)?.read_to_end(&mut data)?;
    let filename = match path.file_name() {
        Some(v) => v.to_string_lossy().to_string(),
        None => name.clone(),
    };

    let form = FormBuilder::new();
    let content_type = form.content_type();
    let body = form.file("octets", &filename, &mime::APPLICATION_OCTET_STREAM, &data)
        .text("URI", &name)
        .text("msgid", &msgid())
        .text("fullPut", "yes")
        .text("ext", "no extension")
        .finish();

    let url = endpoint(args, PUBLISH_PATH)?;
    check(ua.request_url("POST", &url).set("Content-Type", &content_type).send_bytes(&body))?;
    println!("{}", name);
    Ok(())
}

fn register(ua: &Agent, args: &ArgMatches) -> SendResult<()> {
    let name = args.value_of("name").unwrap_or_default();

    let mut form = FormBuilder::new();
    let content_type = form.content_type();
    form = form.text("URI", name)
        .text("msgid", &msgid())
        .text("fullPut", "no");
    if let Some(vs) = args.values_of("loc") {
        for (i, v) in vs.enumerate() {
            form = form.text(&format!("loc{}", i), v);
        }
    }

    let url = endpoint(args, PUBLISH_PATH)?;
    check(ua.request_url("POST", &url).set("Content-Type", &content_type).send_bytes(&form.finish()))?;
    info!("registered {}", name);
    Ok(())
}

fn get(ua: &Agent, args: &ArgMatches) -> SendResult<()> {
    let name = args.value_of("name").unwrap_or_default();
    let id = msgid();

    let url = endpoint(args, RETRIEVE_PATH)?;
    let res = check(ua.request_url("POST", &url).send_form(&[
        ("URI", name),
        ("msgid", id.as_str()),
        ("ext", ""),
    ]))?;
    let content_type = res.content_type().to_string();
    debug!("retrieve answered with {}", &content_type);

    if content_type == "application/json" {
        let locs: Vec<String> = serde_json::from_reader(res.into_reader())?;
        for v in locs.iter() {
            println!("{}", v);
        }
        return Ok(());
    }

    let mut reader = res.into_reader();
    match args.value_of("output") {
        Some(v) => {
            let mut f = File::create(v)?;
            let c = copy(&mut reader, &mut f)?;
            info!("wrote {} bytes to {}", c, v);
        },
        None => {
            let mut w = stdout();
            copy(&mut reader, &mut w)?;
            w.flush()?;
        },
    }
    Ok(())
}

fn app() -> App<'static, 'static> {
    let url_arg = Arg::with_name("url")
        .short("u")
        .long("url")
        .value_name("Proxy base url")
        .takes_value(true)
        .required(true);
    let name_arg = Arg::with_name("name")
        .short("n")
        .long("name")
        .value_name("Name in any form")
        .takes_value(true)
        .required(true);

    let mut o = App::new("niproxy_send");
    o = o.version(env!("CARGO_PKG_VERSION"));
    o = o.setting(AppSettings::SubcommandRequiredElseHelp);

    o = o.subcommand(SubCommand::with_name("publish")
        .about("Upload a file and publish it under its digest")
        .arg(Arg::with_name("file")
             .short("f")
             .long("file")
             .takes_value(true)
             .required(true))
        .arg(Arg::with_name("authority")
             .short("a")
             .long("authority")
             .takes_value(true)
             .required(true))
        .arg(Arg::with_name("algorithm")
             .long("algorithm")
             .takes_value(true)
             .possible_values(&["sha-256", "sha-256-16"]))
        .arg(url_arg.clone())
        );

    o = o.subcommand(SubCommand::with_name("register")
        .about("Publish locations for a name")
        .arg(name_arg.clone())
        .arg(Arg::with_name("loc")
             .short("l")
             .long("loc")
             .takes_value(true)
             .multiple(true)
             .number_of_values(1)
             .required(true))
        .arg(url_arg.clone())
        );

    o = o.subcommand(SubCommand::with_name("get")
        .about("Retrieve content or locations for a name")
        .arg(name_arg)
        .arg(Arg::with_name("output")
             .short("o")
             .long("output")
             .takes_value(true))
        .arg(url_arg)
        );
    o
}

fn main() {
    env_logger::init();

    let args = app().get_matches();
    let ua = AgentBuilder::new().redirects(0).build();

    let r = match args.subcommand() {
        ("publish", Some(v)) => publish(&ua, v),
        ("register", Some(v)) => register(&ua, v),
        ("get", Some(v)) => get(&ua, v),
        _ => Ok(()),
    };
    if let Err(e) = r {
        eprintln!("{}", e);
        process::exit(1);
    }
}
