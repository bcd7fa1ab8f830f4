//! Implementation of the `login` command: opens a browser for the Microsoft sign-in
//! page and catches the redirect on a short-lived local HTTP listener.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use mclaunch::msa::Auth;
use mclaunch::state::PersistentState;

use super::CliError;


const AZURE_APP_ID: &str = "708e91b5-99f8-4a1d-80ec-e746cbb24771";
const REDIRECT_PORT: u16 = 31587;
const REDIRECT_URI: &str = "http://localhost:31587/callback";

pub fn login(state: &PersistentState) -> Result<(), CliError> {

    let auth = Auth::new(AZURE_APP_ID, REDIRECT_URI);
    let (url, pending) = auth.generate_login()?;

    tracing::info!(%url, "opening browser for sign-in");
    if webbrowser::open(&url).is_err() {
        tracing::warn!("could not open a browser automatically, open the URL above manually");
    }

    let callback_url = wait_for_callback()?;
    let code = pending.parse_callback(&callback_url)?;
    let account = pending.exchange(&code)?;

    tracing::info!(username = account.username(), uuid = %account.uuid(), "signed in");

    state.load_and_store(|data| {
        data.put_account(&account);
        data.selected_account = Some(account.uuid());
    })?;

    Ok(())

}

/// Accept a single HTTP connection on the redirect port and return the full request
/// URL, once the browser follows the OAuth redirect back to us.
fn wait_for_callback() -> Result<String, CliError> {

    let listener = TcpListener::bind(("127.0.0.1", REDIRECT_PORT))?;
    let (stream, _) = listener.accept()?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut stream = stream;
    let body = "Signed in, you can close this tab and return to the launcher.";
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes())?;

    Ok(format!("http://localhost:{REDIRECT_PORT}{path}"))

}
