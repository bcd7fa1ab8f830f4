//! Implementation of the `start` command: install (if needed) then launch.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use mclaunch::msa::AuthError;
use mclaunch::state::PersistentState;
use mclaunch::{base, moj};

use super::{CliError, ProgressHandler};


/// Handle to the running game process, so the Ctrl-C handler registered in `main` can
/// kill it instead of leaving it orphaned when the launcher itself is interrupted.
pub(crate) static GAME_CHILD: Mutex<Option<std::process::Child>> = Mutex::new(None);


pub fn start(
    main_dir: &Path,
    state: &PersistentState,
    version: &str,
    demo: bool,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(), CliError> {

    let data = state.load()?;

    let auth = if demo {
        base::Auth::default()
    } else {
        let stored = data.selected_account().ok_or(CliError::NoAccount)?;
        let mut account = stored.to_account();

        if !account.is_offline() {
            if let Err(error) = account.request_profile() {
                refresh_or_fail(&mut account, error)?;
            }
        }

        let auth = base::Auth {
            player_name: account.username().to_string(),
            uuid: account.uuid(),
            access_token: account.access_token().to_string(),
            user_type: if account.is_offline() { "legacy".to_string() } else { "msa".to_string() },
        };

        state.load_and_store(|data| data.put_account(&account))?;

        auth
    };

    let resolution = width.zip(height).or_else(|| {
        data.settings.resolution
            .filter(|_| data.settings.custom_resolution())
            .map(|r| (r.width, r.height))
    });

    let inner = base::Installer::new(version.to_string());
    let mut installer = moj::Installer::from(inner);
    installer.inner.set_main_dir(main_dir);
    installer.inner.set_auth(auth);
    installer.inner.set_demo(demo);

    if let Some((width, height)) = resolution {
        installer.inner.set_resolution(width, height);
    }

    tracing::info!(version, "installing");
    let mut game = installer.install(ProgressHandler, version)?;

    for extra_arg in data.settings.jvm_args().into_iter().rev() {
        tracing::debug!(arg = %extra_arg, "extra jvm argument");
        game.jvm_args.insert(0, extra_arg);
    }

    state.load_and_store(|data| data.last_played_version = Some(version.to_string()))?;

    tracing::info!("launching");
    let child = game.spawn()?;
    GAME_CHILD.lock().unwrap().replace(child);

    // Poll rather than block on `wait()` so the Ctrl-C handler can lock and kill the
    // child without waiting for the game to exit on its own first.
    let status = loop {
        let mut guard = GAME_CHILD.lock().unwrap();
        if let Some(status) = guard.as_mut().unwrap().try_wait()? {
            break status;
        }
        drop(guard);
        std::thread::sleep(Duration::from_millis(200));
    };

    GAME_CHILD.lock().unwrap().take();

    if !status.success() {
        tracing::warn!(?status, "game exited with a non-zero status");
    }

    Ok(())

}

fn refresh_or_fail(account: &mut mclaunch::msa::Account, error: AuthError) -> Result<(), CliError> {
    match error {
        AuthError::OutdatedToken => {
            tracing::info!("refreshing access token");
            account.request_refresh()?;
            Ok(())
        }
        other => Err(other.into()),
    }
}
