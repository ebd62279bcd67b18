//! Credential flows: register, sign-in adoption, passcode add/remove,
//! password change, protocol upgrade, and sign-out.
//!
//! Flows that prompt accept cancellation and leave the prior key mode
//! untouched; nothing mutates until every challenge has been answered.

use qn_core::version::LIBRARY_VERSION;
use qn_core::{QnError, QnResult};
use qn_crypto::{KeyParams, RootKey};
use qn_model::ItemStore;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::challenge::{ChallengeResponder, ChallengeResponse, ChallengeType};
use crate::items_keys;
use crate::key_manager::KeyMode;
use crate::service::ProtocolService;
use crate::storage::StorageFacade;

/// Identifier recorded in wrapper (passcode) key params.
const WRAPPER_IDENTIFIER: &str = "local";

/// Register a fresh account: new root key at the library version, installed
/// per the current key mode, plus a new default items key.
pub fn register(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
    identifier: &str,
    password: &str,
) -> QnResult<()> {
    let (root_key, key_params) = service.create_root_key(identifier, password, LIBRARY_VERSION)?;
    install_account_root_key(service, storage, store, root_key, &key_params)?;
    items_keys::create_new_default_items_key(service, store)?;
    info!(identifier, "registered account");
    Ok(())
}

/// Adopt an account root key during sign-in, deriving it from the
/// server-supplied key params. The sync layer handles the local-data merge.
pub fn sign_in(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
    identifier: &str,
    password: &str,
    server_key_params: &KeyParams,
) -> QnResult<()> {
    if server_key_params.version.is_newer_than_library() {
        return Err(QnError::VersionNewerThanLibrary(
            server_key_params.version.to_string(),
        ));
    }
    let root_key = service.derive_root_key(identifier, password, server_key_params)?;
    install_account_root_key(service, storage, store, root_key, server_key_params)?;
    info!(identifier, "signed in");
    Ok(())
}

fn install_account_root_key(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
    root_key: RootKey,
    key_params: &KeyParams,
) -> QnResult<()> {
    let wrapper = wrapping_key_if_present(service)?;
    let (registry, key_manager) = service.parts_mut();
    key_manager.set_new_root_key(
        root_key,
        key_params,
        wrapper.as_ref(),
        registry,
        storage,
        store,
    )
}

/// The wrapping key an install must re-wrap under, when the mode has one.
/// In `WrapperOnly` the unlocked root key *is* the wrapping key; installing
/// over `RootKeyPlusWrapper` needs a challenge-derived wrapper, which the
/// upgrade flow threads explicitly instead of coming through here.
fn wrapping_key_if_present(service: &ProtocolService) -> QnResult<Option<RootKey>> {
    match service.key_manager().mode() {
        KeyMode::WrapperOnly => Ok(service.key_manager().root_key().cloned()),
        KeyMode::RootKeyPlusWrapper => Err(QnError::InvalidKeyMode {
            mode: "root-key-plus-wrapper requires an explicit wrapping key".into(),
        }),
        _ => Ok(None),
    }
}

/// Set a device passcode. From `None` this creates a local-only crypto
/// domain; from `RootKeyOnly` it moves the root key out of the keychain into
/// wrapped storage.
pub fn add_passcode(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
    passcode: &str,
) -> QnResult<()> {
    let (wrapping_key, wrapper_params) =
        service.create_root_key(WRAPPER_IDENTIFIER, passcode, LIBRARY_VERSION)?;
    let (registry, key_manager) = service.parts_mut();
    key_manager.set_passcode(&wrapping_key, &wrapper_params, registry, storage, store)?;
    debug!("passcode added");
    Ok(())
}

/// Remove the passcode after a successful challenge. Cancel rolls back to
/// the prior mode (nothing has mutated yet).
pub async fn remove_passcode(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    responder: &mut dyn ChallengeResponder,
) -> QnResult<()> {
    let _ = prompt_valid_passcode(service, storage, responder).await?;
    service.key_manager_mut().remove_passcode(storage)?;
    debug!("passcode removed");
    Ok(())
}

/// Prompt until the passcode validates; cancel surfaces `ChallengeCanceled`.
/// Returns the derived wrapping key and the validated passcode.
async fn prompt_valid_passcode(
    service: &mut ProtocolService,
    storage: &StorageFacade,
    responder: &mut dyn ChallengeResponder,
) -> QnResult<(RootKey, String)> {
    let wrapper_params = service
        .key_manager()
        .wrapper_key_params(storage)
        .ok_or_else(|| QnError::InvalidKeyMode {
            mode: service.key_manager().mode().to_string(),
        })?;

    loop {
        let response = responder.prompt(ChallengeType::Passcode).await;
        let ChallengeResponse::Value(passcode) = response else {
            return Err(QnError::ChallengeCanceled);
        };
        let identifier = wrapper_params.identifier.as_deref().unwrap_or(WRAPPER_IDENTIFIER);
        let candidate =
            service.derive_root_key(identifier, passcode.expose_secret(), &wrapper_params)?;
        let (registry, key_manager) = service.parts_mut();
        if key_manager.validate_wrapping_key(&candidate, registry, storage)? {
            return Ok((candidate, passcode.expose_secret().to_string()));
        }
        debug!("invalid passcode attempt");
    }
}

/// Change the account password: validates the current password, then swaps
/// in a fresh root key at the account's current version. Items keys are
/// dirtied for re-upload by the key manager.
pub fn change_password(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
    identifier: &str,
    current_password: &str,
    new_password: &str,
) -> QnResult<()> {
    let params = service
        .key_manager()
        .account_key_params(storage)
        .ok_or_else(|| QnError::KeyMissing {
            operation: "change password".into(),
        })?;
    let current = service.derive_root_key(identifier, current_password, &params)?;
    let root = service.key_manager().root_key().ok_or_else(|| QnError::KeyMissing {
        operation: "change password".into(),
    })?;
    if !root.matches(&current) {
        return Err(QnError::WrappingKeyInvalid);
    }

    let (new_root, new_params) =
        service.create_root_key(identifier, new_password, params.version)?;
    install_account_root_key(service, storage, store, new_root, &new_params)?;
    items_keys::create_new_default_items_key(service, store)?;
    info!("password changed");
    Ok(())
}

/// Upgrade the account (and wrapper, if present) to the library version.
///
/// Challenges run first: the passcode loop repeats until valid, then the
/// account password loop. Cancel at any point leaves the prior mode intact.
/// On success the root key params, wrapper params, and default items key all
/// land at the library version.
pub async fn upgrade_protocol_version(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
    responder: &mut dyn ChallengeResponder,
) -> QnResult<()> {
    let account_params = service
        .key_manager()
        .account_key_params(storage)
        .ok_or_else(|| QnError::KeyMissing {
            operation: "upgrade".into(),
        })?;
    if !account_params.version.upgrade_available() {
        return Ok(());
    }
    let identifier = account_params.identifier.clone().unwrap_or_default();

    let has_wrapper = matches!(
        service.key_manager().mode(),
        KeyMode::RootKeyPlusWrapper | KeyMode::WrapperOnly
    );
    let passcode = if has_wrapper {
        let (wrapping_key, passcode) =
            prompt_valid_passcode(service, storage, responder).await?;
        let (registry, key_manager) = service.parts_mut();
        key_manager.unwrap_root_key(&wrapping_key, registry, storage)?;
        Some(passcode)
    } else {
        None
    };

    // Account password challenge, validated against the unlocked root key.
    let password = loop {
        let response = responder.prompt(ChallengeType::AccountPassword).await;
        let ChallengeResponse::Value(password) = response else {
            return Err(QnError::ChallengeCanceled);
        };
        let candidate =
            service.derive_root_key(&identifier, password.expose_secret(), &account_params)?;
        let root = service.key_manager().root_key().ok_or_else(|| QnError::KeyMissing {
            operation: "upgrade".into(),
        })?;
        if root.matches(&candidate) {
            break password.expose_secret().to_string();
        }
        debug!("invalid account password attempt");
    };

    let (new_root, new_params) =
        service.create_root_key(&identifier, &password, LIBRARY_VERSION)?;

    let new_wrapper = match passcode {
        Some(passcode) => {
            let (wrapper_key, wrapper_params) =
                service.create_root_key(WRAPPER_IDENTIFIER, &passcode, LIBRARY_VERSION)?;
            service
                .key_manager_mut()
                .replace_wrapper_params(&wrapper_params, storage)?;
            Some(wrapper_key)
        }
        None => None,
    };

    let (registry, key_manager) = service.parts_mut();
    key_manager.set_new_root_key(
        new_root,
        &new_params,
        new_wrapper.as_ref(),
        registry,
        storage,
        store,
    )?;
    items_keys::create_new_default_items_key(service, store)?;
    info!(version = %LIBRARY_VERSION, "account upgraded");
    Ok(())
}

/// Sign out: no root key, no items keys, no storage values, no keychain
/// value remain.
pub fn sign_out(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
) -> QnResult<()> {
    service.key_manager_mut().clear(storage)?;
    store.clear();
    storage.wipe()?;
    info!("signed out");
    Ok(())
}
