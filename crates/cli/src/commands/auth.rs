//! Session commands.
//!
//! # Usage
//!
//! ```bash
//! echo "$PASSWORD" | dl login -e agent@example.com
//! dl signup -e new@example.com --first-name Ada --last-name Lovelace
//! dl whoami
//! dl logout
//! ```

use deskline_client::transport::SignupForm;
use deskline_client::{AuthState, HelpdeskClient};
use deskline_core::Identity;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{CliError, Output};

/// Read a password line from stdin.
#[allow(clippy::print_stderr)]
async fn read_password() -> Result<SecretString, CliError> {
    eprint!("Password: ");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;

    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(CliError::EmptyPassword);
    }
    Ok(SecretString::from(password.to_string()))
}

fn describe(identity: &Identity) -> String {
    format!(
        "{} <{}> ({})",
        identity.display_name(),
        identity.email,
        identity.role.label()
    )
}

pub async fn login(client: &HelpdeskClient, output: &Output, email: &str) -> Result<(), CliError> {
    let password = read_password().await?;
    let identity = client.login_with_password(email, password).await?;
    output.emit(&identity, |identity| format!("Signed in as {}", describe(identity)))
}

pub async fn signup(
    client: &HelpdeskClient,
    output: &Output,
    email: String,
    first_name: String,
    last_name: String,
) -> Result<(), CliError> {
    let password = read_password().await?;
    let identity = client
        .signup(SignupForm {
            email,
            password,
            first_name,
            last_name,
        })
        .await?;
    output.emit(&identity, |identity| format!("Welcome, {}", describe(identity)))
}

pub async fn logout(client: &HelpdeskClient) -> Result<(), CliError> {
    client.logout().await?;
    tracing::info!("Signed out");
    Ok(())
}

pub fn whoami(client: &HelpdeskClient, output: &Output) -> Result<(), CliError> {
    match client.auth_state() {
        AuthState::Authenticated(snapshot) => output.emit(&snapshot.identity, |identity| {
            let mut text = describe(identity);
            if snapshot.persisted {
                text.push_str(" (cached, not yet confirmed)");
            }
            text
        }),
        AuthState::Pending => {
            output.note("Signed in, identity not confirmed yet");
            Ok(())
        }
        AuthState::Unauthenticated => Err(CliError::NotSignedIn),
    }
}
