//! `webterm resize <pid> --cols N --rows N`.

use anyhow::Result;
use tracing::info;
use webterm_core::{Dimensions, SessionId};

use crate::client::WebTermClient;

pub async fn run(client: &WebTermClient, id: SessionId, cols: u16, rows: u16) -> Result<()> {
    let size = Dimensions::new(cols, rows)?;
    client.resize(id, size).await?;
    info!(id, %size, "terminal resized");
    Ok(())
}
