use std::{path::Path, sync::Arc};

use notebert::{
    DataDir,
    SemanticService,
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    embedding::HashingLoader,
    events::Notification,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn setup_service(
    root: &Path,
) -> Result<(SemanticService, std::path::PathBuf), Box<dyn std::error::Error>> {
    let notes = root.join("notes");
    std::fs::create_dir_all(&notes)?;

    let data_dir = DataDir::resolve(Some(&root.join("data")))?;
    let service = SemanticService::with_loader(
        data_dir,
        Arc::new(HashingLoader { dimension: 256 }),
    )?;
    service.config_db().set_notes_root(&notes)?;
    Ok((service, notes))
}

#[tokio::test]
async fn deleted_note_is_hidden_and_purged() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (service, notes) = setup_service(tmp.path())?;
    std::fs::write(notes.join("a.md"), "Hello World")?;
    std::fs::write(notes.join("b.md"), "Hello from the other note")?;

    service.initialize(Path::new("hashing")).await?;
    let report = service.reindex_all().await?;
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);

    let mut events = service.subscribe();
    std::fs::remove_file(notes.join("a.md"))?;

    let results = service.search_similar_notes("Hello", None, None).await?;
    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b.md"]);

    assert_eq!(
        events.recv().await?,
        Notification::GhostIndexDetected {
            note_ids: vec!["a.md".to_string()]
        }
    );

    service.shutdown().await;
    assert_eq!(
        events.recv().await?,
        Notification::NoteRemoved {
            note_id: "a.md".to_string()
        }
    );
    let status = service.status().await?;
    assert_eq!(status.indexed_notes, 1);
    Ok(())
}

#[tokio::test]
async fn long_note_is_chunked_and_excluded_from_its_own_query() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (service, notes) = setup_service(tmp.path())?;

    // Long enough for three windows with the default chunking.
    let body = "ownership borrowing lifetimes ".repeat(40);
    assert!(body.trim().chars().count() > 2 * DEFAULT_CHUNK_SIZE);
    assert!(DEFAULT_CHUNK_OVERLAP < DEFAULT_CHUNK_SIZE);
    std::fs::write(
        notes.join("rust.md"),
        format!("---\ntitle: Rust notes\ntags: [lang]\n---\n{body}"),
    )?;
    std::fs::write(notes.join("c.md"), "pointers lifetimes and ownership in C")?;

    service.initialize(Path::new("hashing")).await?;
    let report = service.reindex_all().await?;
    assert_eq!(report.chunks, 4);

    let results = service
        .search_similar_notes("ownership lifetimes", Some("rust.md"), Some(5))
        .await?;
    assert!(results.iter().all(|r| r.id != "rust.md"));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "c.md");

    let results = service
        .search_similar_notes("ownership lifetimes", None, Some(5))
        .await?;
    let rust = results.iter().find(|r| r.id == "rust.md");
    assert_eq!(rust.map(|r| r.title.as_str()), Some("Rust notes"));
    Ok(())
}

#[tokio::test]
async fn identical_notes_are_treated_as_duplicates() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (service, notes) = setup_service(tmp.path())?;
    std::fs::write(notes.join("one.md"), "weekly planning meeting notes")?;
    std::fs::write(notes.join("two.md"), "weekly planning meeting notes")?;
    std::fs::write(notes.join("three.md"), "planning the garden")?;

    service.initialize(Path::new("hashing")).await?;
    service.reindex_all().await?;

    let results = service
        .search_similar_notes(
            "weekly planning meeting notes",
            Some("one.md"),
            None,
        )
        .await?;
    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["three.md"]);
    Ok(())
}

#[tokio::test]
async fn reindex_after_edit_replaces_rows() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (service, notes) = setup_service(tmp.path())?;
    std::fs::write(notes.join("a.md"), "first draft about databases")?;

    service.initialize(Path::new("hashing")).await?;
    service.reindex_all().await?;

    service
        .index_note("a.md", "second draft about gardening")
        .await;
    let results = service.search_similar_notes("gardening", None, None).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].snippet, "second draft about gardening");

    assert_eq!(service.delete_note_index("a.md").await, 1);
    assert!(
        service
            .search_similar_notes("gardening", None, None)
            .await?
            .is_empty()
    );
    Ok(())
}
