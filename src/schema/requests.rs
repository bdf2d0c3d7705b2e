//! Per-kind request types.
//!
//! [`TaskRequest`] is a closed enum with one variant per endpoint. Each
//! variant wraps a plain serde struct that serializes to the exact JSON body
//! the endpoint expects (optional fields are omitted when unset).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{resolution_pattern, Validate, Validator};
use crate::error::ValidationError;
use crate::task::TaskKind;

/// Default model for video and image generation.
pub const DEFAULT_MODEL: &str = "kling-v1";

/// Model accepted by the multi-image endpoint.
pub const MULTI_IMAGE_MODEL: &str = "kling-v1-6";

/// Video generation quality mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoMode {
    /// Standard mode, cheaper and faster.
    #[default]
    #[serde(rename = "std")]
    Standard,
    /// Professional mode, higher quality.
    #[serde(rename = "pro")]
    Professional,
}

/// Aspect ratio of a generated video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 16:9
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    /// 9:16
    #[serde(rename = "9:16")]
    Portrait,
    /// 1:1
    #[serde(rename = "1:1")]
    Square,
}

/// Length of a generated video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoDuration {
    /// Five seconds.
    #[default]
    #[serde(rename = "5")]
    Five,
    /// Ten seconds.
    #[serde(rename = "10")]
    Ten,
}

/// Camera movement preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraControlType {
    /// Single-axis movement described by [`CameraConfig`].
    #[default]
    Simple,
    /// Pull back while descending.
    DownBack,
    /// Push forward while rising.
    ForwardUp,
    /// Turn right then move forward.
    RightTurnForward,
    /// Turn left then move forward.
    LeftTurnForward,
}

/// Per-axis camera movement, each in `-10.0..=10.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// X-axis translation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<f32>,
    /// Y-axis translation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical: Option<f32>,
    /// Rotation around the x axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan: Option<f32>,
    /// Rotation around the y axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilt: Option<f32>,
    /// Rotation around the z axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<f32>,
    /// Focal length change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f32>,
}

impl CameraConfig {
    fn axes(&self) -> [(&'static str, Option<f32>); 6] {
        [
            ("horizontal", self.horizontal),
            ("vertical", self.vertical),
            ("pan", self.pan),
            ("tilt", self.tilt),
            ("roll", self.roll),
            ("zoom", self.zoom),
        ]
    }
}

impl Validate for CameraConfig {
    fn validate_into(&self, v: &mut Validator) {
        for (axis, value) in self.axes() {
            if let Some(value) = value {
                v.range(axis, value, -10.0, 10.0);
            }
        }
    }
}

/// Camera control block of a video request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraControl {
    /// Movement preset.
    #[serde(rename = "type")]
    pub kind: CameraControlType,
    /// Axis values, required for [`CameraControlType::Simple`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<CameraConfig>,
}

impl CameraControl {
    /// Simple movement along one axis.
    pub fn simple(config: CameraConfig) -> Self {
        Self {
            kind: CameraControlType::Simple,
            config: Some(config),
        }
    }
}

impl Validate for CameraControl {
    fn validate_into(&self, v: &mut Validator) {
        match (&self.kind, &self.config) {
            (CameraControlType::Simple, None) => {
                v.push("config", "required when type is `simple`");
            },
            (CameraControlType::Simple, Some(config)) => {
                let moving = config
                    .axes()
                    .iter()
                    .filter(|(_, value)| value.is_some_and(|x| x != 0.0))
                    .count();
                if moving != 1 {
                    v.push(
                        "config",
                        format!("`simple` needs exactly one non-zero axis (got {moving})"),
                    );
                }
                v.nested("config", config);
            },
            (_, Some(config)) => v.nested("config", config),
            (_, None) => {},
        }
    }
}

/// Text-to-video request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToVideoRequest {
    /// Model name.
    pub model_name: String,
    /// Positive prompt, at most 2500 characters.
    pub prompt: String,
    /// Negative prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Prompt adherence in `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f32>,
    /// Quality mode.
    pub mode: VideoMode,
    /// Camera movement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_control: Option<CameraControl>,
    /// Output aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Output length.
    pub duration: VideoDuration,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl TextToVideoRequest {
    /// Request with default settings for `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            prompt: prompt.into(),
            negative_prompt: None,
            cfg_scale: None,
            mode: VideoMode::default(),
            camera_control: None,
            aspect_ratio: AspectRatio::default(),
            duration: VideoDuration::default(),
            callback_url: None,
            external_task_id: None,
        }
    }
}

impl Validate for TextToVideoRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.non_empty("model_name", &self.model_name);
        v.prompt("prompt", &self.prompt);
        v.optional_prompt("negative_prompt", self.negative_prompt.as_deref());
        if let Some(cfg) = self.cfg_scale {
            v.range("cfg_scale", cfg, 0.0, 1.0);
        }
        if let Some(camera) = &self.camera_control {
            v.nested("camera_control", camera);
        }
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// Image-to-video request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageToVideoRequest {
    /// Model name.
    pub model_name: String,
    /// First frame, as an http(s) URL or base64 data.
    pub image: String,
    /// Optional last frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tail: Option<String>,
    /// Positive prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Negative prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Prompt adherence in `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f32>,
    /// Quality mode.
    pub mode: VideoMode,
    /// Output length.
    pub duration: VideoDuration,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl ImageToVideoRequest {
    /// Request with default settings animating `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            image: image.into(),
            image_tail: None,
            prompt: None,
            negative_prompt: None,
            cfg_scale: None,
            mode: VideoMode::default(),
            duration: VideoDuration::default(),
            callback_url: None,
            external_task_id: None,
        }
    }
}

impl Validate for ImageToVideoRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.non_empty("model_name", &self.model_name);
        v.image_source("image", &self.image);
        if let Some(tail) = &self.image_tail {
            v.image_source("image_tail", tail);
        }
        v.optional_prompt("prompt", self.prompt.as_deref());
        v.optional_prompt("negative_prompt", self.negative_prompt.as_deref());
        if let Some(cfg) = self.cfg_scale {
            v.range("cfg_scale", cfg, 0.0, 1.0);
        }
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// One reference image of a multi-image request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Image as an http(s) URL or base64 data.
    pub image: String,
}

impl Validate for ImageItem {
    fn validate_into(&self, v: &mut Validator) {
        v.image_source("image", &self.image);
    }
}

/// Multi-image-to-video request (one to four reference images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiImageToVideoRequest {
    /// Model name.
    pub model_name: String,
    /// Reference images.
    pub image_list: Vec<ImageItem>,
    /// Positive prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Negative prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Quality mode.
    pub mode: VideoMode,
    /// Output length.
    pub duration: VideoDuration,
    /// Output aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl MultiImageToVideoRequest {
    /// Request with default settings for the given images.
    pub fn new<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model_name: MULTI_IMAGE_MODEL.to_string(),
            image_list: images
                .into_iter()
                .map(|image| ImageItem {
                    image: image.into(),
                })
                .collect(),
            prompt: None,
            negative_prompt: None,
            mode: VideoMode::default(),
            duration: VideoDuration::default(),
            aspect_ratio: AspectRatio::default(),
            callback_url: None,
            external_task_id: None,
        }
    }
}

impl Validate for MultiImageToVideoRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.non_empty("model_name", &self.model_name);
        let count = self.image_list.len();
        if !(1..=4).contains(&count) {
            v.push("image_list", format!("must contain 1 to 4 images (got {count})"));
        }
        for (i, item) in self.image_list.iter().enumerate() {
            v.nested(&format!("image_list[{i}]"), item);
        }
        v.optional_prompt("prompt", self.prompt.as_deref());
        v.optional_prompt("negative_prompt", self.negative_prompt.as_deref());
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// Video extension request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoExtensionRequest {
    /// ID of a previously generated video.
    pub video_id: String,
    /// Positive prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Negative prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Prompt adherence in `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f32>,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl VideoExtensionRequest {
    /// Request extending `video_id`.
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            prompt: None,
            negative_prompt: None,
            cfg_scale: None,
            callback_url: None,
            external_task_id: None,
        }
    }
}

impl Validate for VideoExtensionRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.non_empty("video_id", &self.video_id);
        v.optional_prompt("prompt", self.prompt.as_deref());
        v.optional_prompt("negative_prompt", self.negative_prompt.as_deref());
        if let Some(cfg) = self.cfg_scale {
            v.range("cfg_scale", cfg, 0.0, 1.0);
        }
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// Container format of a lip-sync result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// MP4 video.
    #[default]
    Mp4,
    /// Animated GIF.
    Gif,
}

/// Lip-sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LipSyncRequest {
    /// Source video.
    pub video_url: String,
    /// Audio track to sync to.
    pub audio_url: String,
    /// Output container.
    pub output_format: OutputFormat,
    /// Output resolution such as `720p`.
    pub resolution: String,
    /// Output frame rate, `1..=60`.
    pub fps: u32,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
    /// Free-form metadata stored with the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl LipSyncRequest {
    /// Request syncing `video_url` to `audio_url` at 720p / 30 fps.
    pub fn new(video_url: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            audio_url: audio_url.into(),
            output_format: OutputFormat::default(),
            resolution: "720p".to_string(),
            fps: 30,
            callback_url: None,
            external_task_id: None,
            metadata: None,
        }
    }
}

impl Validate for LipSyncRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.http_url("video_url", &self.video_url);
        v.http_url("audio_url", &self.audio_url);
        v.matches(
            "resolution",
            &self.resolution,
            resolution_pattern(),
            "a resolution like `720p`",
        );
        v.range("fps", self.fps, 1, 60);
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// Effect applied by a video-effects task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    /// Restyle after a reference image.
    StyleTransfer,
    /// Color filter.
    Filter,
    /// Detail and sharpness enhancement.
    Enhance,
    /// Motion stabilization.
    Stabilize,
}

/// Output quality preset of a video-effects task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    #[default]
    High,
    /// Ultra.
    Ultra,
}

/// Video-effects request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEffectsRequest {
    /// Source video.
    pub video_url: String,
    /// Effect to apply.
    pub effect_type: EffectType,
    /// Strength in `0.0..=1.0`.
    pub intensity: f32,
    /// Output quality.
    pub quality: VideoQuality,
    /// Style image, required for [`EffectType::StyleTransfer`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_reference: Option<String>,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
    /// Free-form metadata stored with the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl VideoEffectsRequest {
    /// Request applying `effect_type` at intensity 0.5.
    pub fn new(video_url: impl Into<String>, effect_type: EffectType) -> Self {
        Self {
            video_url: video_url.into(),
            effect_type,
            intensity: 0.5,
            quality: VideoQuality::default(),
            style_reference: None,
            callback_url: None,
            external_task_id: None,
            metadata: None,
        }
    }
}

impl Validate for VideoEffectsRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.http_url("video_url", &self.video_url);
        v.range("intensity", self.intensity, 0.0, 1.0);
        match (&self.effect_type, &self.style_reference) {
            (EffectType::StyleTransfer, None) => {
                v.push("style_reference", "required for `style_transfer`");
            },
            (_, Some(reference)) => v.http_url("style_reference", reference),
            (_, None) => {},
        }
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// How a reference image steers image generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageReference {
    /// Keep the subject.
    Subject,
    /// Keep the face.
    Face,
}

/// Aspect ratio of generated images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageAspectRatio {
    /// 16:9
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    /// 9:16
    #[serde(rename = "9:16")]
    Tall,
    /// 1:1
    #[serde(rename = "1:1")]
    Square,
    /// 4:3
    #[serde(rename = "4:3")]
    Standard,
    /// 3:4
    #[serde(rename = "3:4")]
    StandardPortrait,
    /// 3:2
    #[serde(rename = "3:2")]
    Photo,
    /// 2:3
    #[serde(rename = "2:3")]
    PhotoPortrait,
    /// 21:9
    #[serde(rename = "21:9")]
    Ultrawide,
}

/// Image generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    /// Model name.
    pub model_name: String,
    /// Positive prompt, at most 2500 characters.
    pub prompt: String,
    /// Negative prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Reference image, as an http(s) URL or base64 data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// How the reference image is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<ImageReference>,
    /// Reference strength in `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_fidelity: Option<f32>,
    /// Facial strength in `0.0..=1.0`, only with [`ImageReference::Subject`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_fidelity: Option<f32>,
    /// Number of images, `1..=9`.
    pub n: u32,
    /// Output aspect ratio.
    pub aspect_ratio: ImageAspectRatio,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl ImageGenerationRequest {
    /// Request for one image from `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            prompt: prompt.into(),
            negative_prompt: None,
            image: None,
            image_reference: None,
            image_fidelity: None,
            human_fidelity: None,
            n: 1,
            aspect_ratio: ImageAspectRatio::default(),
            callback_url: None,
            external_task_id: None,
        }
    }
}

impl Validate for ImageGenerationRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.non_empty("model_name", &self.model_name);
        v.prompt("prompt", &self.prompt);
        v.optional_prompt("negative_prompt", self.negative_prompt.as_deref());
        if let Some(image) = &self.image {
            v.image_source("image", image);
            if self.model_name == "kling-v1-5" && self.image_reference.is_none() {
                v.push("image_reference", "required when `image` is set on kling-v1-5");
            }
        }
        if let Some(fidelity) = self.image_fidelity {
            v.range("image_fidelity", fidelity, 0.0, 1.0);
        }
        if let Some(fidelity) = self.human_fidelity {
            v.range("human_fidelity", fidelity, 0.0, 1.0);
            if self.image_reference != Some(ImageReference::Subject) {
                v.push("human_fidelity", "only allowed when `image_reference` is `subject`");
            }
        }
        v.range("n", self.n, 1, 9);
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

/// Virtual try-on model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryOnModel {
    /// v1, needs a garment image.
    #[serde(rename = "kolors-virtual-try-on-v1")]
    V1,
    /// v1.5, may infer the garment from the person image.
    #[default]
    #[serde(rename = "kolors-virtual-try-on-v1-5")]
    V1_5,
}

/// Virtual try-on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualTryOnRequest {
    /// Model.
    pub model_name: TryOnModel,
    /// Person image, as an http(s) URL or base64 data.
    pub human_image: String,
    /// Garment image, required for [`TryOnModel::V1`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloth_image: Option<String>,
    /// Webhook target for status updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Caller-chosen correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl VirtualTryOnRequest {
    /// Request on the default model for `human_image`.
    pub fn new(human_image: impl Into<String>) -> Self {
        Self {
            model_name: TryOnModel::default(),
            human_image: human_image.into(),
            cloth_image: None,
            callback_url: None,
            external_task_id: None,
        }
    }
}

impl Validate for VirtualTryOnRequest {
    fn validate_into(&self, v: &mut Validator) {
        v.image_source("human_image", &self.human_image);
        match (&self.model_name, &self.cloth_image) {
            (TryOnModel::V1, None) => {
                v.push("cloth_image", "required for kolors-virtual-try-on-v1");
            },
            (_, Some(cloth)) => v.image_source("cloth_image", cloth),
            (_, None) => {},
        }
        validate_common(v, self.callback_url.as_deref(), self.external_task_id.as_deref());
    }
}

fn validate_common(v: &mut Validator, callback_url: Option<&str>, external_task_id: Option<&str>) {
    v.optional_http_url("callback_url", callback_url);
    if let Some(id) = external_task_id {
        v.non_empty("external_task_id", id);
    }
}

/// A request for any supported task kind.
///
/// # Examples
///
/// ```
/// use kling::schema::requests::{TaskRequest, TextToVideoRequest};
/// use kling::schema::Validate;
/// use kling::TaskKind;
///
/// let request: TaskRequest = TextToVideoRequest::new("a red fox in snow").into();
/// assert_eq!(request.kind(), TaskKind::TextToVideo);
/// assert!(request.validate().is_ok());
///
/// let empty: TaskRequest = TextToVideoRequest::new("").into();
/// assert_eq!(empty.validate().unwrap_err().path(), "prompt");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    /// Text to video.
    TextToVideo(TextToVideoRequest),
    /// Image to video.
    ImageToVideo(ImageToVideoRequest),
    /// Several images to video.
    MultiImageToVideo(MultiImageToVideoRequest),
    /// Video extension.
    VideoExtension(VideoExtensionRequest),
    /// Lip sync.
    LipSync(LipSyncRequest),
    /// Video effects.
    VideoEffects(VideoEffectsRequest),
    /// Image generation.
    ImageGeneration(ImageGenerationRequest),
    /// Virtual try-on.
    VirtualTryOn(VirtualTryOnRequest),
}

macro_rules! each_variant {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            TaskRequest::TextToVideo($inner) => $body,
            TaskRequest::ImageToVideo($inner) => $body,
            TaskRequest::MultiImageToVideo($inner) => $body,
            TaskRequest::VideoExtension($inner) => $body,
            TaskRequest::LipSync($inner) => $body,
            TaskRequest::VideoEffects($inner) => $body,
            TaskRequest::ImageGeneration($inner) => $body,
            TaskRequest::VirtualTryOn($inner) => $body,
        }
    };
}

impl TaskRequest {
    /// Endpoint this request targets.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::TextToVideo(_) => TaskKind::TextToVideo,
            Self::ImageToVideo(_) => TaskKind::ImageToVideo,
            Self::MultiImageToVideo(_) => TaskKind::MultiImageToVideo,
            Self::VideoExtension(_) => TaskKind::VideoExtension,
            Self::LipSync(_) => TaskKind::LipSync,
            Self::VideoEffects(_) => TaskKind::VideoEffects,
            Self::ImageGeneration(_) => TaskKind::ImageGeneration,
            Self::VirtualTryOn(_) => TaskKind::VirtualTryOn,
        }
    }

    /// Webhook target, if set.
    pub fn callback_url(&self) -> Option<&str> {
        each_variant!(self, r => r.callback_url.as_deref())
    }

    /// Sets the webhook target.
    pub fn set_callback_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        each_variant!(self, r => r.callback_url = Some(url))
    }

    /// Caller-chosen correlation ID, if set.
    pub fn external_task_id(&self) -> Option<&str> {
        each_variant!(self, r => r.external_task_id.as_deref())
    }

    /// Sets the caller-chosen correlation ID.
    pub fn set_external_task_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        each_variant!(self, r => r.external_task_id = Some(id))
    }

    /// Builder-style [`set_callback_url`](Self::set_callback_url).
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.set_callback_url(url);
        self
    }

    /// Builder-style [`set_external_task_id`](Self::set_external_task_id).
    pub fn with_external_task_id(mut self, id: impl Into<String>) -> Self {
        self.set_external_task_id(id);
        self
    }

    /// JSON body sent to the create endpoint.
    pub fn to_body(&self) -> Result<Value, ValidationError> {
        let body = each_variant!(self, r => serde_json::to_value(r));
        body.map_err(|e| ValidationError::new("$", format!("request is not serializable: {e}")))
    }
}

impl Validate for TaskRequest {
    fn validate_into(&self, v: &mut Validator) {
        each_variant!(self, r => r.validate_into(v))
    }
}

macro_rules! impl_from_request {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for TaskRequest {
                fn from(request: $ty) -> Self {
                    Self::$variant(request)
                }
            }
        )*
    };
}

impl_from_request!(
    TextToVideo(TextToVideoRequest),
    ImageToVideo(ImageToVideoRequest),
    MultiImageToVideo(MultiImageToVideoRequest),
    VideoExtension(VideoExtensionRequest),
    LipSync(LipSyncRequest),
    VideoEffects(VideoEffectsRequest),
    ImageGeneration(ImageGenerationRequest),
    VirtualTryOn(VirtualTryOnRequest),
);
