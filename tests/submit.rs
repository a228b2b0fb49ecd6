//! Submission: per-mode validation, payload shaping, store seeding.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::FakeProvider;
use vidrelay::error::RelayError;
use vidrelay::submit::{GenerationRequest, SubjectReference, Submitter, build_payload, validate};
use vidrelay::task::store::{MemoryTaskStore, TaskStore};
use vidrelay::task::{GenerationMode, TaskStatus};

fn request(mode: GenerationMode) -> GenerationRequest {
    GenerationRequest {
        mode: Some(mode),
        model: Some("MiniMax-Hailuo-02".into()),
        ..Default::default()
    }
}

fn validation_message(req: &GenerationRequest) -> String {
    match validate(req) {
        Err(RelayError::Validation(msg)) => msg,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn model_is_always_required() {
    let req = GenerationRequest {
        prompt: Some("a cat".into()),
        mode: Some(GenerationMode::TextToVideo),
        ..Default::default()
    };
    assert_eq!(validation_message(&req), "Missing required field: model is required");
}

#[test]
fn each_mode_names_its_missing_fields() {
    assert_eq!(
        validation_message(&request(GenerationMode::TextToVideo)),
        "Missing required field: prompt is required for text-to-video mode"
    );
    assert_eq!(
        validation_message(&request(GenerationMode::ImageToVideo)),
        "Missing required field: first_frame_image is required for image-to-video mode"
    );
    assert_eq!(
        validation_message(&request(GenerationMode::FirstLastFrame)),
        "Missing required fields: first_frame_image and last_frame_image are required for first-last-frame mode"
    );
    assert_eq!(
        validation_message(&request(GenerationMode::SubjectReference)),
        "Missing required field: subject_reference array is required for subject-reference mode"
    );
}

#[test]
fn blank_strings_count_as_missing() {
    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("   ".into());
    assert!(validate(&req).is_err());
}

#[test]
fn omitted_mode_means_image_to_video() {
    let req: GenerationRequest =
        serde_json::from_value(json!({"model": "m", "first_frame_image": "https://img/1.png"}))
            .unwrap();
    assert_eq!(req.mode_or_default(), GenerationMode::ImageToVideo);
    assert!(validate(&req).is_ok());
}

#[test]
fn subject_reference_type_defaults_to_character() {
    let req: GenerationRequest = serde_json::from_value(json!({
        "mode": "subject-reference",
        "model": "S2V-01",
        "subject_reference": [{"image": ["https://img/face.png"]}],
    }))
    .unwrap();
    let subjects = req.subject_reference.as_ref().unwrap();
    assert_eq!(subjects[0].kind, "character");
    assert!(validate(&req).is_ok());
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[test]
fn text_to_video_payload_carries_no_image_fields() {
    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("a cat surfing".into());
    req.first_frame_image = Some("https://img/stray.png".into());
    req.duration = Some(6);
    req.resolution = Some("1080P".into());

    let payload = build_payload(&req, None);
    let map = payload.as_object().unwrap();
    assert!(!map.contains_key("first_frame_image"));
    assert!(!map.contains_key("last_frame_image"));
    assert!(!map.contains_key("subject_reference"));
    assert!(!map.contains_key("mode"));
    assert_eq!(payload["prompt"], "a cat surfing");
    assert_eq!(payload["duration"], 6);
    assert_eq!(payload["resolution"], "1080P");
}

#[test]
fn image_to_video_payload_drops_last_frame() {
    let mut req = request(GenerationMode::ImageToVideo);
    req.first_frame_image = Some("data:image/png;base64,AAAA".into());
    req.last_frame_image = Some("https://img/last.png".into());

    let payload = build_payload(&req, None);
    assert_eq!(payload["first_frame_image"], "data:image/png;base64,AAAA");
    assert!(payload.get("last_frame_image").is_none());
}

#[test]
fn first_last_frame_payload_has_both_frames() {
    let mut req = request(GenerationMode::FirstLastFrame);
    req.first_frame_image = Some("https://img/first.png".into());
    req.last_frame_image = Some("https://img/last.png".into());

    let payload = build_payload(&req, None);
    assert_eq!(payload["first_frame_image"], "https://img/first.png");
    assert_eq!(payload["last_frame_image"], "https://img/last.png");
}

#[test]
fn subject_reference_payload_keeps_type_key() {
    let mut req = request(GenerationMode::SubjectReference);
    req.prompt = Some("walks".into());
    req.first_frame_image = Some("https://img/ignored.png".into());
    req.subject_reference = Some(vec![
        SubjectReference {
            kind: "character".into(),
            image: vec!["https://img/face.png".into()],
        },
        SubjectReference {
            kind: "character".into(),
            image: vec![],
        },
    ]);

    let payload = build_payload(&req, None);
    assert_eq!(
        payload["subject_reference"],
        json!([
            {"type": "character", "image": ["https://img/face.png"]},
            {"type": "character", "image": []},
        ])
    );
    assert!(payload.get("first_frame_image").is_none());
}

#[test]
fn request_callback_url_overrides_default() {
    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("p".into());

    let payload = build_payload(&req, Some("https://relay/callback"));
    assert_eq!(payload["callback_url"], "https://relay/callback");

    req.callback_url = Some("https://mine/cb".into());
    let payload = build_payload(&req, Some("https://relay/callback"));
    assert_eq!(payload["callback_url"], "https://mine/cb");

    let payload = build_payload(&req, None);
    assert_eq!(payload["callback_url"], "https://mine/cb");
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

fn submitter() -> (Submitter, Arc<MemoryTaskStore>, Arc<FakeProvider>) {
    let store = Arc::new(MemoryTaskStore::new());
    let provider = Arc::new(FakeProvider::new());
    let submitter = Submitter::new(store.clone(), provider.clone())
        .with_callback_url(Some("https://relay/callback".into()));
    (submitter, store, provider)
}

#[tokio::test]
async fn invalid_request_never_reaches_provider() {
    let (submitter, store, provider) = submitter();
    let err = submitter
        .submit(&request(GenerationMode::TextToVideo))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)));
    assert_eq!(provider.create_calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn successful_submit_seeds_queued_record() {
    let (submitter, store, provider) = submitter();
    provider.push_create(Ok(json!({"task_id": "T1", "base_resp": {"status_code": 0}})));

    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("a cat".into());
    let record = submitter.submit(&req).await.unwrap();

    assert_eq!(record.task_id, "T1");
    assert_eq!(record.status, TaskStatus::Queued);
    assert_eq!(record.mode, Some(GenerationMode::TextToVideo));
    assert_eq!(store.get("T1").unwrap(), record);

    let sent = provider.create_payloads.lock().unwrap()[0].clone();
    assert_eq!(sent["callback_url"], "https://relay/callback");
}

#[tokio::test]
async fn callback_before_create_returns_keeps_callback_state() {
    let (submitter, store, provider) = submitter();
    provider.push_create(Ok(json!({"task_id": "T1"})));
    store.merge(
        "T1",
        &vidrelay::task::TaskUpdate::status(TaskStatus::Succeeded),
    );

    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("a cat".into());
    let record = submitter.submit(&req).await.unwrap();

    assert_eq!(record.status, TaskStatus::Succeeded);
    assert_eq!(record.mode, Some(GenerationMode::TextToVideo));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn provider_rejection_surfaces_status_code() {
    let (submitter, store, provider) = submitter();
    provider.push_create(Ok(json!({
        "task_id": "",
        "base_resp": {"status_code": 1008, "status_msg": "insufficient balance"},
    })));

    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("a cat".into());
    match submitter.submit(&req).await.unwrap_err() {
        RelayError::ProviderApplication { code, message } => {
            assert_eq!(code, 1008);
            assert_eq!(message, "insufficient balance");
        }
        other => panic!("expected ProviderApplication, got {other:?}"),
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn create_response_without_task_id_is_schema_error() {
    let (submitter, _store, provider) = submitter();
    provider.push_create(Ok(json!({"base_resp": {"status_code": 0}})));

    let mut req = request(GenerationMode::TextToVideo);
    req.prompt = Some("a cat".into());
    assert!(matches!(
        submitter.submit(&req).await,
        Err(RelayError::SchemaParse(_))
    ));
}
