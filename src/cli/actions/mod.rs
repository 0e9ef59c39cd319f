pub mod bootstrap;
pub mod server;

use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    BootstrapAdmin(bootstrap::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns whatever the action fails with.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::BootstrapAdmin(args) => bootstrap::execute(args).await,
        }
    }
}
