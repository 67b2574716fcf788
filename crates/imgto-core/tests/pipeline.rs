//! End-to-end pipeline tests against the scripted media service

use imgto_core::prelude::*;
use imgto_core::{
    ArchiveEntry, CommandConverter, ConvertCommand, DecodeError, ImageDecoder, Preview,
    PreviewDecoder, UploadError,
};
use imgto_test_utils::{heic_file, png_bytes, png_file, FakeMediaService, Script};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn session(fake: &Arc<FakeMediaService>, config: PipelineConfig) -> Session {
    Session::new(config, fake.clone(), fake.clone())
}

fn states(session: &Session) -> Vec<(String, RecordState)> {
    session
        .snapshot()
        .iter()
        .map(|r| (r.name.clone(), r.state))
        .collect()
}

#[tokio::test]
async fn uploads_never_exceed_the_limit() {
    let fake = Arc::new(FakeMediaService::new().with_delay(Duration::from_millis(20)));
    let session = session(&fake, PipelineConfig::default().with_upload_concurrency(3));
    session.add_files((0..10).map(|i| png_file(&format!("{i}.png"))));

    let mut rx = session.subscribe();
    let watcher = tokio::spawn(async move {
        let mut peak = 0;
        while rx.changed().await.is_ok() {
            let uploading = rx
                .borrow_and_update()
                .iter()
                .filter(|r| r.state == RecordState::Uploading)
                .count();
            peak = peak.max(uploading);
        }
        peak
    });

    let summary = session.process().await.unwrap();
    assert_eq!(summary.finished, 10);
    assert!(fake.peak_in_flight() <= 3, "peak {}", fake.peak_in_flight());
    assert!(fake.peak_in_flight() > 1);

    drop(session);
    let observed = watcher.await.unwrap();
    assert!(observed <= 3, "observed {observed} uploading records");
}

#[tokio::test]
async fn admission_follows_collection_order() {
    let fake = Arc::new(FakeMediaService::new().with_delay(Duration::from_millis(5)));
    let session = session(&fake, PipelineConfig::default().with_upload_concurrency(1));
    let names: Vec<String> = (0..6).map(|i| format!("{i}.png")).collect();
    session.add_files(names.iter().map(|n| png_file(n)));

    session.process().await.unwrap();
    assert_eq!(fake.upload_order(), names);
}

#[tokio::test]
async fn moderation_rejection_is_isolated() {
    let fake = Arc::new(FakeMediaService::new().script("bad.png", Script::RejectContent));
    let session = session(&fake, PipelineConfig::default());
    session.add_files([png_file("a.png"), png_file("bad.png"), png_file("c.png")]);
    let mut notices = session.notices();

    session.process().await.unwrap();

    assert_eq!(
        states(&session),
        vec![
            ("a.png".to_string(), RecordState::Finished),
            ("bad.png".to_string(), RecordState::Error),
            ("c.png".to_string(), RecordState::Finished),
        ]
    );
    let bad = &session.snapshot()[1];
    assert_eq!(bad.errors, vec![UploadError::Rejected.user_message().to_string()]);
    assert!(bad.variants.is_empty());
    assert_eq!(notices.recv().await.unwrap().name, "bad.png");
}

#[tokio::test]
async fn fetch_failures_map_to_messages() {
    let fake = Arc::new(
        FakeMediaService::new()
            .script("blocked.png", Script::FetchUnauthorized)
            .script("flaky.png", Script::FetchFails)
            .script("tiny.png", Script::TooSmall),
    );
    let session = session(&fake, PipelineConfig::default());
    session.add_files([png_file("blocked.png"), png_file("flaky.png"), png_file("tiny.png")]);
    session.process().await.unwrap();

    let errors: Vec<String> = session
        .snapshot()
        .iter()
        .map(|r| r.errors.join(""))
        .collect();
    assert_eq!(
        errors,
        vec![
            "Something went wrong. Try disabling any Ad Blockers and try again!".to_string(),
            "Unknown Error".to_string(),
            "Images smaller than 80x80px are not supported.".to_string(),
        ]
    );
    assert_eq!(session.progress().global_state, GlobalState::Finished);
}

#[tokio::test]
async fn variants_present_only_when_finished() {
    let fake = Arc::new(FakeMediaService::new().script("b.png", Script::FailUpload));
    let oversized = session(&fake, PipelineConfig::default().with_max_file_size(1));
    oversized.add_files([png_file("a.png")]);
    let mixed = session(&fake, PipelineConfig::default());
    mixed.add_files([png_file("a.png"), png_file("b.png")]);

    oversized.process().await.unwrap();
    mixed.process().await.unwrap();

    for record in oversized.snapshot().iter().chain(mixed.snapshot().iter()) {
        assert_eq!(
            !record.variants.is_empty(),
            record.state == RecordState::Finished,
            "{} in {}",
            record.name,
            record.state
        );
    }
    // oversized file is routed to error after its preview
    let record = &oversized.snapshot()[0];
    assert_eq!(record.state, RecordState::Error);
    assert!(record.preview.is_some());
    assert!(fake.upload_order().iter().filter(|n| *n == "a.png").count() == 1);
}

// `cp` stands in for a HEIC decoder: the payload is already a PNG
#[cfg(unix)]
#[tokio::test]
async fn heic_is_converted_for_preview() {
    let fake = Arc::new(FakeMediaService::new());
    let converter = CommandConverter::empty()
        .with_command("image/heic", ConvertCommand::new("imgto-missing-decoder"))
        .with_command("image/heic", ConvertCommand::new("cp"));
    let session = session(&fake, PipelineConfig::default()).with_converter(Arc::new(converter));
    session.add_files([SourceFile::new("IMG_0001.HEIC", "", png_bytes(24, 12))]);

    session.read_previews().await.unwrap();
    let record = &session.snapshot()[0];
    assert_eq!(record.state, RecordState::Read);
    assert_eq!(record.source.mime, "image/heic");
    assert!(record.preview.is_some());
    assert_eq!(record.dimensions(), Some((24, 12)));
}

#[tokio::test]
async fn unconvertible_types_fail_before_upload() {
    let fake = Arc::new(FakeMediaService::new());
    let session = session(&fake, PipelineConfig::default())
        .with_converter(Arc::new(CommandConverter::empty()));
    session.add_files([heic_file("IMG_0002.HEIC"), png_file("a.png")]);

    session.process().await.unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot[0].state, RecordState::Error);
    assert_eq!(
        snapshot[0].errors,
        vec![DecodeError::ConverterUnavailable("image/heic".into())
            .user_message()
            .to_string()]
    );
    assert_eq!(snapshot[1].state, RecordState::Finished);
    assert_eq!(fake.upload_order(), vec!["a.png".to_string()]);
}

/// Decoder that records how many decodes overlap
#[derive(Default)]
struct OverlapDecoder {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl PreviewDecoder for OverlapDecoder {
    fn decode(&self, bytes: &[u8], max_dimension: u32) -> Result<Preview, DecodeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ImageDecoder.decode(bytes, max_dimension)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn preview_cap_bounds_concurrent_decodes() {
    let fake = Arc::new(FakeMediaService::new());
    let decoder = Arc::new(OverlapDecoder::default());
    let session = session(&fake, PipelineConfig::default().with_preview_concurrency(2))
        .with_decoder(decoder.clone());
    session.add_files((0..8).map(|i| png_file(&format!("{i}.png"))));

    assert_eq!(session.read_previews().await.unwrap(), 8);
    assert!(decoder.peak.load(Ordering::SeqCst) <= 2);
    assert!(session.snapshot().iter().all(|r| r.state == RecordState::Read));
}

#[tokio::test]
async fn zero_preview_cap_does_not_stall() {
    let fake = Arc::new(FakeMediaService::new());
    let session = session(&fake, PipelineConfig::default().with_preview_concurrency(0));
    session.add_files([png_file("a.png"), png_file("b.png")]);

    let summary = tokio::time::timeout(Duration::from_secs(5), session.process())
        .await
        .expect("processing stalled")
        .unwrap();
    assert_eq!(summary.finished, 2);
}

#[tokio::test]
async fn archive_holds_one_member_per_finished_record() {
    let fake = Arc::new(FakeMediaService::new().script("c.png", Script::RejectContent));
    let session = session(&fake, PipelineConfig::default());
    session.add_files([png_file("a.png"), png_file("b.png"), png_file("c.png")]);
    session.process().await.unwrap();

    let entries = session.archive_entries();
    assert_eq!(
        entries.iter().map(ArchiveEntry::member_name).collect::<Vec<_>>(),
        vec!["a.png", "b.png"]
    );

    let archive = session.archive().await.unwrap();
    let zip = zip::ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
    let names: HashSet<&str> = zip.file_names().collect();
    assert_eq!(names, HashSet::from(["a.png", "b.png"]));
}

#[tokio::test]
async fn download_measures_lazily() {
    let fake = Arc::new(FakeMediaService::new().with_payload(&b"webp!"[..]));
    let session = session(&fake, PipelineConfig::default());
    let ids = session.add_files([png_file("photo.png")]);
    session.process().await.unwrap();
    assert_eq!(session.snapshot()[0].variants.get(Format::Webp).unwrap().size, None);

    let dir = tempfile::tempdir().unwrap();
    let path = session
        .download_variant(&ids[0], Format::Webp, dir.path())
        .await
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "photo.webp");
    assert_eq!(std::fs::read(&path).unwrap(), b"webp!");
    assert_eq!(session.snapshot()[0].variants.get(Format::Webp).unwrap().size, Some(5));
}

#[tokio::test]
async fn reset_starts_over_without_reusing_ids() {
    let fake = Arc::new(FakeMediaService::new());
    let session = session(&fake, PipelineConfig::default().with_max_files(1));
    let mut first = session.add_files([png_file("a.png")]);
    assert!(session.is_full());

    session.reset();
    assert!(session.snapshot().is_empty());
    assert!(!session.is_full());
    assert_eq!(session.progress().percent, 0.0);

    first.extend(session.add_files([png_file("a.png")]));
    assert!(session.snapshot()[0].errors.is_empty());
    assert_ne!(first[0], first[1]);
}
