#![allow(clippy::doc_markdown, clippy::uninlined_format_args)]
//! Example: send one themed notification email
//!
//! Transport settings come from `COURIER_*` environment variables, one per
//! configuration key (`COURIER_HOST`, `COURIER_PORT`, `COURIER_SSL`,
//! `COURIER_STARTTLS`, `COURIER_AUTH`, `COURIER_USER`, `COURIER_PASSWORD`,
//! `COURIER_FROM`, `COURIER_FROMDISPLAYNAME`, ...). Attachments are read from
//! the theme directory's `theme.properties`.
//!
//! ## Running
//!
//! ```bash
//! export COURIER_HOST=smtp.example.com
//! export COURIER_STARTTLS=true
//! export COURIER_AUTH=true
//! export COURIER_USER=alice
//! export COURIER_PASSWORD=secret
//! export COURIER_FROM=no-reply@example.com
//! # Optional: custom trust anchors, and accept any host name on them
//! export COURIER_TRUSTSTORE=/etc/courier/relay.pem
//! export COURIER_HOSTNAME_VERIFICATION=any
//! cargo run --package courier-core --example send_notification -- \
//!     bob@example.com themes/base/email
//! ```

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{Context, bail};
use courier_core::config::keys;
use courier_core::{
    DefaultTrust, DirectoryTheme, EmailSenderProvider, HostnameVerificationPolicy, PemTruststore,
    TrustProvider,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ALL_KEYS: [&str; 14] = [
    keys::HOST,
    keys::PORT,
    keys::AUTH,
    keys::SSL,
    keys::STARTTLS,
    keys::FROM,
    keys::FROM_DISPLAY_NAME,
    keys::REPLY_TO,
    keys::REPLY_TO_DISPLAY_NAME,
    keys::ENVELOPE_FROM,
    keys::USER,
    keys::PASSWORD,
    keys::CONNECTION_TIMEOUT,
    keys::TIMEOUT,
];

fn config_from_env() -> HashMap<String, String> {
    ALL_KEYS
        .iter()
        .filter_map(|key| {
            let var = format!("COURIER_{}", key.to_uppercase());
            env::var(var).ok().map(|value| ((*key).to_string(), value))
        })
        .collect()
}

fn trust_from_env() -> anyhow::Result<Arc<dyn TrustProvider>> {
    let policy = match env::var("COURIER_HOSTNAME_VERIFICATION").as_deref() {
        Ok("any") => HostnameVerificationPolicy::Any,
        Ok("strict") | Err(_) => HostnameVerificationPolicy::Strict,
        Ok(other) => bail!("COURIER_HOSTNAME_VERIFICATION must be strict or any, got {other:?}"),
    };
    let trust: Arc<dyn TrustProvider> = match env::var_os("COURIER_TRUSTSTORE") {
        Some(path) => Arc::new(PemTruststore::new(path).with_policy(policy)),
        None if policy == HostnameVerificationPolicy::Strict => Arc::new(DefaultTrust),
        None => bail!("COURIER_HOSTNAME_VERIFICATION=any requires COURIER_TRUSTSTORE"),
    };
    Ok(trust)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_core=debug,courier_smtp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = env::args().skip(1);
    let recipient = args
        .next()
        .context("usage: send_notification <recipient> [theme-dir]")?;
    let theme_dir = args.next().unwrap_or_else(|| ".".to_string());

    let sender = EmailSenderProvider::new(
        Arc::new(DirectoryTheme::new(theme_dir)),
        trust_from_env()?,
    );

    sender
        .send(
            &config_from_env(),
            recipient.as_str(),
            "Reset your password",
            Some("Someone asked to reset the password of your account.\n\nIf this was you, follow the link in the HTML version of this email."),
            Some("<p>Someone asked to reset the password of your account.</p><p><a href=\"https://example.com/reset\">Reset password</a></p>"),
        )
        .await
        .context("sending notification failed")?;

    println!("Notification sent to {recipient}");
    Ok(())
}
