//! Entrypoint lifecycle glue: storage unlock at `StorageDecrypted`, the
//! database load at `LoadingDatabase`, and item-row persistence.

use qn_core::{ApplicationStage, ContentType, QnResult};
use qn_model::{ItemStore, Payload, PayloadSource};
use tracing::{debug, info};

use crate::intent::EncryptionIntent;
use crate::service::ProtocolService;
use crate::storage::{StorageEncryptionPolicy, StorageFacade};

/// Dispatch one lifecycle stage. The host drives stages in declared order
/// and awaits each before the next; storage access becomes legal at
/// `Launched`.
pub fn advance_to(
    stage: ApplicationStage,
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &mut ItemStore,
) -> QnResult<()> {
    match stage {
        ApplicationStage::PreparingForLaunch => {
            service.key_manager_mut().compute_mode_on_load(storage)?;
            Ok(())
        }
        ApplicationStage::StorageDecrypted => unlock_storage(service, storage),
        ApplicationStage::Launched => {
            storage.set_launched();
            Ok(())
        }
        ApplicationStage::LoadingDatabase => {
            load_database(service, storage, store).map(|_| ())
        }
        ApplicationStage::LoadedDatabase => Ok(()),
    }
}

/// Decrypt the wrapped storage domain after the root key is available.
/// A no-op when storage was persisted plaintext.
pub fn unlock_storage(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
) -> QnResult<()> {
    if !storage.needs_decrypt() {
        return Ok(());
    }
    let payload = storage
        .encrypted_wrapped_payload()
        .cloned()
        .expect("needs_decrypt implies an encrypted payload");
    let content = service.decrypt_root_payload(&payload)?;
    storage.install_unwrapped(&content);
    debug!("storage unwrapped");
    Ok(())
}

/// Persist the storage object, encrypting the wrapped domain under the root
/// key unless the encryption policy disables it.
pub fn persist_storage(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
) -> QnResult<()> {
    let encrypted = match storage.encryption_policy() {
        StorageEncryptionPolicy::Disabled => None,
        StorageEncryptionPolicy::Default => {
            service.encrypt_storage_content(storage.unwrapped_as_content())?
        }
    };
    storage.persist_storage_object(encrypted)
}

/// Persist every current item as a row, encrypted per the
/// prefer-encrypted local-storage intent.
pub fn persist_item_rows(
    service: &mut ProtocolService,
    storage: &mut StorageFacade,
    store: &ItemStore,
) -> QnResult<usize> {
    let payloads: Vec<Payload> = store.items().map(|item| item.payload().clone()).collect();
    let intent = match storage.encryption_policy() {
        StorageEncryptionPolicy::Disabled => EncryptionIntent::LocalStorageDecrypted,
        StorageEncryptionPolicy::Default => EncryptionIntent::LocalStoragePreferEncrypted,
    };
    let rows = service.encrypt_payloads(&payloads, intent, store)?;
    storage.save_payload_rows(&rows)?;
    Ok(rows.len())
}

/// Load persisted payload rows into the collection, decrypting per payload
/// version. Items keys decrypt first; everything else may need them.
pub fn load_database(
    service: &mut ProtocolService,
    storage: &StorageFacade,
    store: &mut ItemStore,
) -> QnResult<usize> {
    let rows = storage.load_payload_rows()?;
    let count = rows.len();

    let (keys, rest): (Vec<Payload>, Vec<Payload>) = rows
        .into_iter()
        .partition(|p| p.content_type == ContentType::ItemsKey);

    let decrypted_keys = service.decrypt_payloads(&keys, store);
    store.apply(decrypted_keys, PayloadSource::LocalRetrieved);
    let decrypted_rest = service.decrypt_payloads(&rest, store);
    store.apply(decrypted_rest, PayloadSource::LocalRetrieved);

    info!(count, "database loaded");
    Ok(count)
}
