//! `webterm create`: spawn a new remote terminal and print its id.

use anyhow::Result;
use tracing::info;
use webterm_core::Dimensions;

use crate::client::WebTermClient;
use crate::terminal;

/// Create a terminal sized `cols`x`rows`, defaulting to the local terminal size.
pub async fn run(client: &WebTermClient, cols: Option<u16>, rows: Option<u16>) -> Result<()> {
    let size = requested_size(cols, rows)?;
    let id = client.create(size).await?;
    info!(id, %size, "terminal created");
    println!("{id}");
    Ok(())
}

pub(crate) fn requested_size(cols: Option<u16>, rows: Option<u16>) -> Result<Dimensions> {
    let local = terminal::terminal_size();
    Ok(Dimensions::new(
        cols.unwrap_or(local.cols),
        rows.unwrap_or(local.rows),
    )?)
}
