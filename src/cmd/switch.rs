//! `wsrelay switch` — trigger a manual account switch on a running instance.

use hyper::Method;

use super::client;
use crate::admin::DASHBOARD_HEADER;
use crate::cli::SwitchArgs;
use crate::error::RelayError;

pub async fn execute(args: SwitchArgs) -> Result<(), RelayError> {
    let url = client::endpoint(&args.url, "/switch");
    let headers: Vec<(&str, &str)> = args
        .key
        .as_deref()
        .map(|key| vec![(DASHBOARD_HEADER, key)])
        .unwrap_or_default();

    let reply = client::send(Method::POST, &url, &headers).await?;
    let json: Option<serde_json::Value> = serde_json::from_slice(&reply.body).ok();

    if !reply.status.is_success() {
        let message = json
            .as_ref()
            .and_then(|v| v.pointer("/error/message"))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| reply.text(), String::from);
        return Err(RelayError::SwitchFailed {
            status: reply.status,
            message,
        });
    }

    let message = json
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| reply.text(), String::from);
    println!("\u{2713} {message}");
    Ok(())
}
