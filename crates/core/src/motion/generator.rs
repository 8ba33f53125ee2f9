//! Procedural keyframe generation from a style profile.

use super::{
    MotionKeyframe, MotionTracks, RootPosition,
    style::{StyleMatch, StyleProfile, match_style},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Map, Value, json};
use std::f64::consts::PI;

pub const BONES: [&str; 7] = [
    "hips",
    "spine",
    "chest",
    "leftUpperArm",
    "rightUpperArm",
    "leftLowerArm",
    "rightLowerArm",
];

const CHOPPY_STEP: f64 = 0.12;

/// Output of [`generate_prompt_motion`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedMotion {
    pub tracks: MotionTracks,
    pub root_position: Vec<RootPosition>,
    pub metadata: Map<String, Value>,
}

/// Frame times from 0 to `duration_sec` inclusive, rounded to 0.1 ms.
pub fn time_stamps(duration_sec: f64, fps: u32) -> impl Iterator<Item = f64> {
    let fps = fps.max(1);
    let frame_count = ((duration_sec * fps as f64) as usize).max(1);
    (0..=frame_count).map(move |frame| round_to(frame as f64 / fps as f64, 4))
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

fn quantize(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

/// Quaternion for intrinsic X/Y/Z Euler angles.
pub fn quaternion_from_euler(t: f64, rx: f64, ry: f64, rz: f64) -> MotionKeyframe {
    let (sx, cx) = (rx / 2.0).sin_cos();
    let (sy, cy) = (ry / 2.0).sin_cos();
    let (sz, cz) = (rz / 2.0).sin_cos();
    MotionKeyframe {
        t,
        x: sx * cy * cz - cx * sy * sz,
        y: cx * sy * cz + sx * cy * sz,
        z: cx * cy * sz - sx * sy * cz,
        w: cx * cy * cz + sx * sy * sz,
    }
}

struct TrackWriter<'a> {
    tracks: &'a mut MotionTracks,
    choppy: bool,
}

impl TrackWriter<'_> {
    fn push(&mut self, bone: &str, t: f64, rx: f64, ry: f64, rz: f64) {
        let (rx, ry, rz) = if self.choppy {
            (
                quantize(rx, CHOPPY_STEP),
                quantize(ry, CHOPPY_STEP),
                quantize(rz, CHOPPY_STEP),
            )
        } else {
            (rx, ry, rz)
        };
        self.tracks
            .entry(bone.to_string())
            .or_default()
            .push(quaternion_from_euler(t, rx, ry, rz));
    }
}

/// Builds a deterministic clip for `prompt`. The same inputs always give the
/// same keyframes.
pub fn generate_prompt_motion(prompt: &str, duration_sec: f64, fps: u32, seed: u64) -> GeneratedMotion {
    let StyleMatch {
        style,
        matched_prompt,
        score,
    } = match_style(prompt);
    let mut rng = StdRng::seed_from_u64(seed);
    let style: StyleProfile = style.jittered(&mut rng);
    let phase = rng.random_range(0.0..2.0 * PI);
    let root_phase = rng.random_range(0.0..2.0 * PI);

    let mut tracks: MotionTracks = BONES.iter().map(|b| (b.to_string(), Vec::new())).collect();
    let mut root_position = Vec::new();
    let mut writer = TrackWriter {
        tracks: &mut tracks,
        choppy: style.choppy,
    };

    for t in time_stamps(duration_sec, fps) {
        let freq = style.freq;
        let sway = style.sway * (freq * 0.5 * t + 0.3).sin();
        let twist = style.twist * (freq * 0.5 * t + 0.6).sin();
        let bounce = style.bounce * (freq * t + 0.1).sin();
        let spin = style.spin * t;
        let lean = style.lean;

        writer.push(
            "hips",
            t,
            bounce - style.crouch,
            twist + spin,
            style.root_sway * 0.5 * (freq * 0.5 * t + 1.2).sin(),
        );
        writer.push("spine", t, lean * 0.4 + 0.4 * sway, twist * 0.5, sway * 0.4);
        writer.push(
            "chest",
            t,
            lean * 0.7 + 0.6 * sway,
            twist * 0.8 + spin * 0.2,
            sway * 0.5,
        );

        let arm_swing = style.swing * (freq * t + phase).sin();
        let arm_twist = 0.35 * style.swing * (freq * 0.5 * t + phase * 0.5).sin();
        let lift = style.arm_lift;
        writer.push(
            "leftUpperArm",
            t,
            arm_swing + lift,
            arm_twist - 0.1 * lean,
            0.25 * sway,
        );
        writer.push(
            "rightUpperArm",
            t,
            -arm_swing + lift,
            -arm_twist - 0.1 * lean,
            -0.25 * sway,
        );
        writer.push(
            "leftLowerArm",
            t,
            0.65 * arm_swing + lift * 0.5,
            0.5 * arm_twist,
            0.2 * sway,
        );
        writer.push(
            "rightLowerArm",
            t,
            -0.65 * arm_swing + lift * 0.5,
            -0.5 * arm_twist,
            -0.2 * sway,
        );

        let forward = style.forward_speed * t + style.root_sway * (freq * 0.5 * t + root_phase).sin();
        let lateral = style.root_sway * 0.4 * (freq * 0.5 * t + root_phase + PI / 2.0).sin();
        let vertical = (style.vertical_amp * (freq * 0.5 * t).sin().abs()).max(0.0) + (bounce * 0.25).max(0.0);
        root_position.push(RootPosition {
            t,
            x: forward,
            y: vertical,
            z: lateral,
        });
    }

    let mut metadata = Map::new();
    metadata.insert("generator".into(), json!("prompt-library"));
    metadata.insert("style".into(), json!(style.name));
    metadata.insert("matched_prompt".into(), json!(matched_prompt));
    metadata.insert("match_score".into(), json!(round_to(score, 3)));
    metadata.insert("seed".into(), json!(seed));

    GeneratedMotion {
        tracks,
        root_position,
        metadata,
    }
}
