//! Implementation of the `logout` command.

use uuid::Uuid;

use mclaunch::state::PersistentState;

use super::CliError;


pub fn logout(state: &PersistentState, id: Option<Uuid>) -> Result<(), CliError> {

    state.load_and_store(|data| -> Result<(), CliError> {

        let id = id
            .or(data.selected_account)
            .ok_or(CliError::NoAccount)?;

        let removed = data.remove_account(id).ok_or(CliError::AccountNotFound(id))?;
        tracing::info!(username = %removed.username, uuid = %removed.uuid, "signed out");

        Ok(())

    })?

}
