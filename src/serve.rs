use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::handler::HandlerWithoutStateExt;
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, Local};
use nix::errno::Errno;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Hidden subcommand the launcher re-executes itself with.
pub const SERVE_SUBCOMMAND: &str = "__serve";

/// Timestamp layout of access log lines, e.g. `14/Oct/2026 09:05:03`.
pub const LOG_DATE_FORMAT: &str = "%d/%b/%Y %H:%M:%S";

// ---------------------------------------------------------------------------
// ServeSpec
// ---------------------------------------------------------------------------

/// Everything a detached instance needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServeSpec {
    pub bind: String,
    pub port: u16,
    pub dir: PathBuf,
    pub log_file: PathBuf,
}

impl ServeSpec {
    /// Arguments that make the binary run this instance in the foreground.
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            SERVE_SUBCOMMAND.into(),
            "--bind".into(),
            self.bind.clone().into(),
            "--port".into(),
            self.port.to_string().into(),
            "--dir".into(),
            self.dir.clone().into_os_string(),
            "--log-file".into(),
            self.log_file.clone().into_os_string(),
        ]
    }

    fn bind_host(&self) -> &str {
        if self.bind.is_empty() {
            "0.0.0.0"
        } else {
            &self.bind
        }
    }
}

// ---------------------------------------------------------------------------
// Detaching
// ---------------------------------------------------------------------------

/// Leave the launcher's session, send stdout and stderr to the log file, take
/// stdin from /dev/null and enter the served directory, in that order.
///
/// The log is opened first so that every later failure reaches it. A log that
/// cannot be opened is only visible as an unconfirmed start.
///
/// Must run before any runtime threads exist.
pub fn detach(spec: &ServeSpec) -> io::Result<()> {
    if let Some(parent) = spec.log_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_file)?;

    let session = nix::unistd::setsid();

    nix::unistd::dup2_stdout(&log)?;
    nix::unistd::dup2_stderr(&log)?;
    let null = File::open("/dev/null")?;
    nix::unistd::dup2_stdin(&null)?;

    match session {
        // Already a process group leader; the redirection above still cuts
        // the terminal off.
        Ok(_) | Err(Errno::EPERM) => {}
        Err(e) => return Err(io::Error::other(format!("setsid: {e}"))),
    }

    std::env::set_current_dir(&spec.dir)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", spec.dir.display())))
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

/// Bind and serve until SIGTERM or SIGINT.
pub async fn run(spec: &ServeSpec) -> io::Result<()> {
    let listener = match TcpListener::bind((spec.bind_host(), spec.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}:{}: {e}", spec.bind, spec.port);
            return Err(e);
        }
    };
    tracing::info!(
        dir = %spec.dir.display(),
        "serving HTTP on {}",
        listener.local_addr()?
    );

    serve_listener(listener, spec.dir.clone(), crate::sys::signal_shutdown()).await?;
    tracing::info!("server stopped");
    Ok(())
}

pub async fn serve_listener(
    listener: TcpListener,
    root: PathBuf,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    axum::serve(
        listener,
        router(root).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Files under `root`, `index.html` for directories, a generated listing for
/// directories without one.
pub fn router(root: PathBuf) -> Router {
    let listing_root = root.clone();
    let listing = move |uri: Uri| {
        let root = listing_root.clone();
        async move { directory_listing(&root, &uri).await }
    };

    let files = ServeDir::new(root).fallback(listing.into_service());
    Router::new()
        .fallback_service(files)
        .layer(middleware::from_fn(access_log))
}

async fn access_log(request: Request, next: Next) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let request_line = format!(
        "{} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );

    let response = next.run(request).await;
    println!(
        "{}",
        access_line(client, Local::now(), &request_line, response.status().as_u16())
    );
    response
}

/// `127.0.0.1 - - [14/Oct/2026 09:05:03] "GET / HTTP/1.1" 200 -`
pub fn access_line(
    client: Option<IpAddr>,
    at: DateTime<Local>,
    request_line: &str,
    status: u16,
) -> String {
    let client = client
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{client} - - [{}] \"{request_line}\" {status} -",
        at.format(LOG_DATE_FORMAT)
    )
}

// ---------------------------------------------------------------------------
// Directory listing
// ---------------------------------------------------------------------------

async fn directory_listing(root: &Path, uri: &Uri) -> Response {
    let Some(display_path) = urlencoding::decode(uri.path()).ok() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(dir) = resolve_path(root, &display_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(mut read_dir) = tokio::fs::read_dir(&dir).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    entries.sort();

    Html(render_listing(&display_path, &entries)).into_response()
}

/// Map a decoded request path onto `root`. Anything that would climb out of
/// `root` is refused.
pub fn resolve_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

pub fn render_listing(display_path: &str, entries: &[(String, bool)]) -> String {
    let title = escape_html(&format!("Directory listing for {display_path}"));
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<hr>\n<ul>\n"
    );
    for (name, is_dir) in entries {
        let slash = if *is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<li><a href=\"{}{slash}\">{}{slash}</a></li>\n",
            urlencoding::encode(name),
            escape_html(name)
        ));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
