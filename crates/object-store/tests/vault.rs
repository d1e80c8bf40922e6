//! The vault end to end over remote object storage

use std::sync::Arc;

use casevault_object_store::RemoteBackend;
use common::prelude::*;
use common::testkit::{fixtures, MemoryRecords};

const PROJECT_SECRET: &str = "project-secret";

fn vault(backend: RemoteBackend, records: &MemoryRecords) -> Vault {
    Vault::new(
        DocumentCipher::new(Passphrase::new(PROJECT_SECRET)),
        Arc::new(backend),
        Arc::new(records.clone()),
        VaultOptions { workers: 2 },
    )
}

#[tokio::test]
async fn test_upload_download_delete() {
    let temp = tempfile::tempdir().unwrap();
    let staging = temp.path().join("staging");
    fixtures::write_pdf(&staging.join("a.pdf"), 2).unwrap();
    fixtures::write_binder(&staging.join("b.pdf"), &[1, 1]).unwrap();

    let records = MemoryRecords::new();
    let vault = vault(RemoteBackend::memory(), &records);

    let desired = vec![
        AttachmentDescriptor::new_upload("a.pdf", "labs"),
        AttachmentDescriptor::new_upload("b.pdf", "labs"),
    ];
    let report = vault
        .reconcile(ReconcileRequest {
            product: ProductLine::Mcsc,
            record_id: "rec-9",
            desired: &desired,
            staging_dir: &staging,
            exports: None,
        })
        .await
        .unwrap();
    assert_eq!(report.added.len(), 2);

    let stored = records.active(ProductLine::Mcsc, "rec-9");
    let session = SessionExports::new(temp.path().join("exports"), Passphrase::generate());
    for (attachment, pages) in stored.iter().zip([2, 2]) {
        let key = vault
            .download(ProductLine::Mcsc, &attachment.id, &session)
            .await
            .unwrap();
        let path = session.lookup(&key).unwrap().path;
        assert_eq!(
            fixtures::page_count(&path, session.passphrase().expose()).unwrap(),
            pages
        );
    }

    vault
        .reconcile(ReconcileRequest {
            product: ProductLine::Mcsc,
            record_id: "rec-9",
            desired: &[],
            staging_dir: &staging,
            exports: Some(&session),
        })
        .await
        .unwrap();
    assert!(session.is_empty());

    let err = vault
        .download(ProductLine::Mcsc, &stored[0].id, &session)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
