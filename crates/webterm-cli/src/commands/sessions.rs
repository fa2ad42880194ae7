//! `webterm sessions`: list live terminals on the server.

use anyhow::Result;

use crate::client::{SessionSummary, WebTermClient};

pub async fn run(client: &WebTermClient) -> Result<()> {
    let sessions = client.list().await?;
    print!("{}", render(&sessions));
    Ok(())
}

fn render(sessions: &[SessionSummary]) -> String {
    let mut out = format!(
        "{:<10} {:<10} {:<8} {:<10} {}\n",
        "PID", "SIZE", "CLIENTS", "HISTORY", "AGE"
    );
    if sessions.is_empty() {
        out.push_str("(no sessions)\n");
        return out;
    }
    for s in sessions {
        out.push_str(&format!(
            "{:<10} {:<10} {:<8} {:<10} {}s\n",
            s.id,
            format!("{}x{}", s.cols, s.rows),
            s.attachments,
            s.history_bytes,
            s.age_secs
        ));
    }
    out
}
