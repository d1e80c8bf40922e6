use common::prelude::*;
use common::testkit::fixtures;

use casevault_daemon::{AppConfig, AppState, Database, Service, StorageConfig};

async fn service(storage: StorageConfig) -> (tempfile::TempDir, Service) {
    let temp = tempfile::tempdir().unwrap();
    let config = AppConfig {
        product_line: ProductLine::Mn,
        secret_key: Passphrase::new("project-secret"),
        storage,
        ..Default::default()
    };
    let state = AppState::init(Some(temp.path().join("vault")), Some(config)).unwrap();
    let database = Database::in_memory().await.unwrap();
    let service = Service::with_database(state, database).await.unwrap();
    (temp, service)
}

async fn upload_and_download(service: &Service) {
    let staging = service.state().staging_path.clone();
    fixtures::write_pdf(&staging.join("scan.pdf"), 3).unwrap();

    let report = service
        .reconcile(
            ProductLine::Mn,
            "rec-1",
            &[AttachmentDescriptor::new_upload("scan.pdf", "Imaging")],
            &staging,
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.added.len(), 1);
    assert!(!staging.join("scan.pdf").exists());

    let session_dir = service.state().session_dir("session-1").unwrap();
    let session = SessionExports::new(session_dir, Passphrase::new("session-secret"));
    let key = service
        .vault()
        .download(ProductLine::Mn, &report.added[0], &session)
        .await
        .unwrap();

    let entry = session.lookup(&key).unwrap();
    assert_eq!(fixtures::page_count(&entry.path, "session-secret").unwrap(), 3);
    assert_eq!(session.close().unwrap(), 1);
}

#[tokio::test]
async fn test_filesystem_backend() {
    let (_temp, service) = service(StorageConfig::default()).await;
    assert_eq!(service.vault().backend().name(), "filesystem");
    assert_eq!(service.product_line(), ProductLine::Mn);

    upload_and_download(&service).await;
    assert!(service.state().files_path.join("mn/rec-1").exists());
}

#[tokio::test]
async fn test_memory_backend() {
    let (_temp, service) = service(StorageConfig::Memory).await;
    assert_eq!(service.vault().backend().name(), "object-store");

    upload_and_download(&service).await;
}

#[tokio::test]
async fn test_reconcile_with_assigned_case() {
    let (_temp, service) = service(StorageConfig::Memory).await;
    let staging = service.state().staging_path.clone();
    fixtures::write_pdf(&staging.join("scan.pdf"), 1).unwrap();

    let report = service
        .reconcile(
            ProductLine::Mn,
            "rec-1",
            &[AttachmentDescriptor::new_upload("scan.pdf", "Imaging")],
            &staging,
            None,
        )
        .await
        .unwrap();
    service
        .database()
        .set_case_status(ProductLine::Mn, "rec-1", "case-1", "not_started")
        .await
        .unwrap();

    let err = service
        .reconcile(ProductLine::Mn, "rec-1", &[], &staging, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let current = service
        .database()
        .load_current_attachments(ProductLine::Mn, "rec-1")
        .await
        .unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, report.added[0]);
}

fn stored_objects(service: &Service, product: ProductLine, record_id: &str) -> usize {
    let dir = service
        .state()
        .files_path
        .join(product.as_str())
        .join(record_id);
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join("data").exists())
            .count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_replace_with_same_name() {
    let (_temp, service) = service(StorageConfig::default()).await;
    let staging = service.state().staging_path.clone();
    fixtures::write_pdf(&staging.join("report.pdf"), 1).unwrap();
    let first = service
        .reconcile(
            ProductLine::Mn,
            "rec-1",
            &[AttachmentDescriptor::new_upload("report.pdf", "Imaging")],
            &staging,
            None,
        )
        .await
        .unwrap();
    let old_id = first.added[0].clone();

    // the desired set drops the stored file and uploads one with its name
    fixtures::write_pdf(&staging.join("report.pdf"), 3).unwrap();
    let report = service
        .reconcile(
            ProductLine::Mn,
            "rec-1",
            &[AttachmentDescriptor::new_upload("report.pdf", "Imaging")],
            &staging,
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.deleted, vec![old_id.clone()]);
    assert_eq!(report.added.len(), 1);

    let database = service.database();
    let current = database
        .load_current_attachments(ProductLine::Mn, "rec-1")
        .await
        .unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, report.added[0]);
    assert_eq!(current[0].file_name, "report.pdf");

    let old = database
        .get_attachment(ProductLine::Mn, &old_id)
        .await
        .unwrap()
        .unwrap();
    assert!(old.deleted_at.is_some());
    assert_eq!(stored_objects(&service, ProductLine::Mn, "rec-1"), 1);
}

#[tokio::test]
async fn test_last_file_deletable_once_case_is_done() {
    let (_temp, service) = service(StorageConfig::default()).await;
    let staging = service.state().staging_path.clone();
    fixtures::write_pdf(&staging.join("scan.pdf"), 1).unwrap();
    service
        .reconcile(
            ProductLine::Mn,
            "rec-1",
            &[AttachmentDescriptor::new_upload("scan.pdf", "Imaging")],
            &staging,
            None,
        )
        .await
        .unwrap();

    let database = service.database();
    database
        .set_case_status(ProductLine::Mn, "rec-1", "case-1", "in_progress")
        .await
        .unwrap();
    let err = service
        .reconcile(ProductLine::Mn, "rec-1", &[], &staging, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(stored_objects(&service, ProductLine::Mn, "rec-1"), 1);

    database
        .set_case_status(ProductLine::Mn, "rec-1", "case-1", "closed")
        .await
        .unwrap();
    let report = service
        .reconcile(ProductLine::Mn, "rec-1", &[], &staging, None)
        .await
        .unwrap();
    assert_eq!(report.deleted.len(), 1);
    assert!(database
        .load_current_attachments(ProductLine::Mn, "rec-1")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(stored_objects(&service, ProductLine::Mn, "rec-1"), 0);
}

#[tokio::test]
async fn test_soc_association_update() {
    let (_temp, service) = service(StorageConfig::default()).await;
    let staging = service.state().staging_path.clone();
    fixtures::write_pdf(&staging.join("notes.pdf"), 1).unwrap();
    service
        .reconcile(
            ProductLine::Soc,
            "rec-7",
            &[AttachmentDescriptor::new_upload("notes.pdf", "Notes")
                .with_visibility(true, &["case-1"])],
            &staging,
            None,
        )
        .await
        .unwrap();

    let database = service.database();
    let stored = database
        .load_current_attachments(ProductLine::Soc, "rec-7")
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].show_nurse_review, Some(true));
    assert_eq!(stored[0].tags, vec!["case-1"]);

    let kept = AttachmentDescriptor::keep(&stored[0]).with_visibility(false, &["case-2", "case-3"]);
    let report = service
        .reconcile(ProductLine::Soc, "rec-7", &[kept], &staging, None)
        .await
        .unwrap();
    assert_eq!(report.associations_updated, 1);
    assert!(report.added.is_empty());
    assert!(report.deleted.is_empty());

    let updated = database
        .load_current_attachments(ProductLine::Soc, "rec-7")
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].id, stored[0].id);
    assert_eq!(updated[0].show_nurse_review, Some(false));
    assert_eq!(updated[0].tags, vec!["case-2", "case-3"]);
    assert_eq!(stored_objects(&service, ProductLine::Soc, "rec-7"), 1);
}
