//! Getting the user through the authorize URL and back.
//!
//! Interactive grants hand the authorize URL to an [AuthorizationPrompt], which returns the full URL the user was
//! redirected to. [LocalServerPrompt] captures the redirect with a [one-shot local listener](CallbackListener);
//! [PastePrompt] asks the user to paste the URL. Any `Fn(&Url) -> Result<String>` closure is a prompt too.

use std::{
    io::{self, BufRead, ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use reqwest::Url;

use crate::{
    config::parse_url,
    error::{Error, Result},
};

const SUCCESS_HTML: &str = "<html><head><title>Authorization complete</title></head><body><h1>Authorization \
                            complete</h1><p>You may close this window.</p></body></html>";
const MAX_REQUEST_HEAD: usize = 8192;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Presents an authorize URL to the user and returns the URL they were redirected to.
pub trait AuthorizationPrompt: Send + Sync {
    fn authorize(&self, authorize_url: &Url, redirect_uri: &str) -> Result<String>;
}

impl<F> AuthorizationPrompt for F
where
    F: Fn(&Url) -> Result<String> + Send + Sync,
{
    fn authorize(&self, authorize_url: &Url, _redirect_uri: &str) -> Result<String> {
        (self)(authorize_url)
    }
}

type UrlPresenter = Box<dyn Fn(&Url) + Send + Sync>;

/// Listens on the redirect URI's host and port for the redirect. The redirect URI must be a plain `http` URL on the
/// local machine, e.g. `http://127.0.0.1:8888/callback`.
pub struct LocalServerPrompt {
    timeout: Option<Duration>,
    presenter: Option<UrlPresenter>,
}

/// Prints the authorize URL to stderr and reads the redirect URL from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct PastePrompt;

/// A single-request HTTP listener. It accepts exactly one connection, responds with a static confirmation page and
/// returns the request's full URL. The socket is closed when the listener is dropped, which happens on every return
/// path of [wait](CallbackListener::wait).
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    host: String,
    port: u16,
}

impl LocalServerPrompt {
    pub fn new() -> Self {
        Self {
            timeout: None,
            presenter: None,
        }
    }

    /// Give up if no redirect arrives within the timeout. Waits indefinitely by default.
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Show the authorize URL to the user, e.g. by opening it in a browser. The URL is logged at info level by
    /// default.
    pub fn presenter<F>(self, presenter: F) -> Self
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        Self {
            presenter: Some(Box::new(presenter)),
            ..self
        }
    }
}

impl Default for LocalServerPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalServerPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServerPrompt")
            .field("timeout", &self.timeout)
            .field("presenter", &self.presenter.is_some())
            .finish()
    }
}

impl AuthorizationPrompt for LocalServerPrompt {
    fn authorize(&self, authorize_url: &Url, redirect_uri: &str) -> Result<String> {
        // the listener has to be up before the user can possibly be redirected
        let listener = CallbackListener::bind(redirect_uri)?;

        match &self.presenter {
            Some(presenter) => presenter(authorize_url),
            None => info!("Open this URL to authorize the application: {}", authorize_url),
        }

        listener.wait(self.timeout).map(String::from)
    }
}

impl AuthorizationPrompt for PastePrompt {
    fn authorize(&self, authorize_url: &Url, _redirect_uri: &str) -> Result<String> {
        let mut stderr = io::stderr();
        writeln!(stderr, "Open this URL to authorize the application:\n\n    {}\n", authorize_url)
            .and_then(|_| write!(stderr, "Enter the URL you were redirected to: "))
            .and_then(|_| stderr.flush())
            .map_err(Error::CallbackServer)?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map_err(Error::CallbackServer)?;

        Ok(line.trim().to_owned())
    }
}

impl CallbackListener {
    /// Binds to the host and port of the redirect URI. Port 0 binds an ephemeral port, see
    /// [port](CallbackListener::port).
    pub fn bind(redirect_uri: &str) -> Result<Self> {
        let url = parse_url(redirect_uri)?;
        let host = url.host_str().unwrap_or("127.0.0.1").to_owned();
        let port = url.port_or_known_default().unwrap_or(80);

        let listener = TcpListener::bind((host.as_str(), port)).map_err(Error::CallbackServer)?;
        let port = listener.local_addr().map_err(Error::CallbackServer)?.port();
        debug!("Listening for the authorization redirect on {}:{}", host, port);

        Ok(Self { listener, host, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Blocks until exactly one request arrives, or the timeout elapses.
    pub fn wait(self, timeout: Option<Duration>) -> Result<Url> {
        let mut stream = self.accept(timeout)?;
        stream.set_read_timeout(Some(READ_TIMEOUT)).map_err(Error::CallbackServer)?;

        let head = read_request_head(&mut stream).map_err(Error::CallbackServer)?;
        let target = match request_target(&head) {
            Some(target) => target,
            None => {
                respond(&mut stream, "400 Bad Request", "<html><body>Bad request</body></html>");
                return Err(Error::CallbackServer(io::Error::new(
                    ErrorKind::InvalidData,
                    "malformed authorization redirect request",
                )));
            }
        };

        respond(&mut stream, "200 OK", SUCCESS_HTML);

        let url = format!("http://{}:{}{}", self.host, self.port, target);
        debug!("Received authorization redirect: {}", url);
        parse_url(&url)
    }

    fn accept(&self, timeout: Option<Duration>) -> Result<TcpStream> {
        let Some(timeout) = timeout else {
            let (stream, _) = self.listener.accept().map_err(Error::CallbackServer)?;
            return Ok(stream);
        };

        self.listener.set_nonblocking(true).map_err(Error::CallbackServer)?;
        let started = Instant::now();

        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false).map_err(Error::CallbackServer)?;
                    return Ok(stream);
                }

                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= timeout {
                        warn!("Timed out waiting for the authorization redirect");
                        return Err(Error::CallbackTimeout(timeout));
                    }

                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }

                Err(err) => return Err(Error::CallbackServer(err)),
            }
        }
    }
}

fn read_request_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];

    while head.len() < MAX_REQUEST_HEAD && !head.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buf)?;
        if read == 0 {
            break;
        }

        head.extend_from_slice(&buf[..read]);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn request_target(head: &str) -> Option<&str> {
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;

    (method == "GET" && target.starts_with('/')).then_some(target)
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    // the redirect has been captured already; the browser not getting the page isn't worth failing over
    if let Err(err) = stream.write_all(response.as_bytes()).and_then(|_| stream.flush()) {
        warn!("Failed to respond to the authorization redirect: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn send_request(port: u16, request: &'static str) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.write_all(request.as_bytes()).unwrap();

            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        })
    }

    #[test]
    fn captures_exactly_one_redirect() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/callback").unwrap();
        let port = listener.port();
        let client = send_request(port, "GET /callback?code=abc&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n");

        let url = listener.wait(Some(Duration::from_secs(10))).unwrap();
        let response = client.join().unwrap();

        assert_eq!(url.path(), "/callback");
        assert_eq!(url.query(), Some("code=abc&state=xyz"));
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Authorization complete"));

        // the listener is gone once the redirect has been captured
        assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    }

    #[test]
    fn times_out_and_releases_the_port() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/callback").unwrap();
        let port = listener.port();

        let err = listener.wait(Some(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, Error::CallbackTimeout(_)));

        CallbackListener::bind(&format!("http://127.0.0.1:{}/callback", port)).unwrap();
    }

    #[test]
    fn rejects_non_get_requests() {
        let listener = CallbackListener::bind("http://127.0.0.1:0/callback").unwrap();
        let client = send_request(listener.port(), "POST /callback HTTP/1.1\r\nHost: localhost\r\n\r\n");

        let err = listener.wait(Some(Duration::from_secs(10))).unwrap_err();
        assert!(matches!(err, Error::CallbackServer(_)));
        assert!(client.join().unwrap().starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn closures_are_prompts() {
        let prompt = |url: &Url| -> Result<String> { Ok(format!("{}?code=c", url)) };
        let url = Url::parse("http://localhost/authorize").unwrap();

        assert_eq!(
            prompt.authorize(&url, "http://localhost/callback").unwrap(),
            "http://localhost/authorize?code=c"
        );
    }
}
