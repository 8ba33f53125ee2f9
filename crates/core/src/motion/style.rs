//! Named motion styles and prompt matching.

use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};
use rand::{Rng, rngs::StdRng};

/// Oscillator parameters for one kind of movement. Angles are radians,
/// distances metres, frequencies radians per second.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleProfile {
    pub name: &'static str,
    pub freq: f64,
    pub swing: f64,
    pub sway: f64,
    pub twist: f64,
    pub bounce: f64,
    pub forward_speed: f64,
    pub root_sway: f64,
    pub arm_lift: f64,
    pub vertical_amp: f64,
    pub spin: f64,
    pub crouch: f64,
    pub lean: f64,
    /// Quantize joint angles for a stepped look.
    pub choppy: bool,
}

impl StyleProfile {
    const BASE: StyleProfile = StyleProfile {
        name: "freestyle",
        freq: 1.4,
        swing: 0.35,
        sway: 0.2,
        twist: 0.2,
        bounce: 0.1,
        forward_speed: 0.05,
        root_sway: 0.02,
        arm_lift: 0.0,
        vertical_amp: 0.0,
        spin: 0.0,
        crouch: 0.0,
        lean: 0.0,
        choppy: false,
    };

    /// A copy with the rhythmic terms scaled by random factors drawn from `rng`.
    pub fn jittered(&self, rng: &mut StdRng) -> StyleProfile {
        let jitter = 1.0 + rng.random_range(-0.08..0.08);
        let root = 0.8 + rng.random_range(0.0..0.4);
        let vertical = 0.9 + rng.random_range(0.0..0.2);
        StyleProfile {
            freq: self.freq * jitter,
            swing: self.swing * jitter,
            sway: self.sway * jitter,
            twist: self.twist * jitter,
            bounce: self.bounce * jitter,
            forward_speed: self.forward_speed * jitter,
            root_sway: self.root_sway * root,
            vertical_amp: self.vertical_amp * vertical,
            ..self.clone()
        }
    }
}

pub const STYLES: &[StyleProfile] = &[
    StyleProfile::BASE,
    StyleProfile {
        name: "martial",
        freq: 2.0,
        swing: 0.55,
        sway: 0.22,
        twist: 0.35,
        bounce: 0.16,
        forward_speed: 0.25,
        root_sway: 0.04,
        vertical_amp: 0.08,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "slow_walk",
        freq: 1.1,
        sway: 0.16,
        twist: 0.18,
        bounce: 0.07,
        forward_speed: 0.22,
        root_sway: 0.03,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "walk_confident",
        freq: 1.6,
        swing: 0.45,
        sway: 0.18,
        twist: 0.22,
        bounce: 0.12,
        forward_speed: 0.55,
        root_sway: 0.05,
        vertical_amp: 0.06,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "walk_backward",
        freq: 1.3,
        swing: 0.32,
        sway: 0.14,
        twist: 0.16,
        bounce: 0.08,
        forward_speed: -0.28,
        root_sway: 0.03,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "flight",
        freq: 1.7,
        swing: 0.6,
        forward_speed: 0.4,
        bounce: 0.12,
        root_sway: 0.04,
        arm_lift: 0.45,
        vertical_amp: 0.12,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "hop",
        freq: 1.5,
        swing: 0.4,
        sway: 0.16,
        twist: 0.15,
        bounce: 0.12,
        forward_speed: 0.35,
        root_sway: 0.04,
        vertical_amp: 0.18,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "slash",
        freq: 1.8,
        swing: 0.65,
        twist: 0.4,
        bounce: 0.14,
        forward_speed: 0.35,
        root_sway: 0.03,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "tiptoe",
        swing: 0.28,
        sway: 0.14,
        twist: 0.17,
        bounce: 0.08,
        forward_speed: 0.25,
        root_sway: 0.04,
        crouch: 0.12,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "dance",
        freq: 2.3,
        swing: 0.6,
        sway: 0.35,
        twist: 0.3,
        bounce: 0.2,
        forward_speed: 0.1,
        root_sway: 0.08,
        vertical_amp: 0.12,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "stumble",
        freq: 1.6,
        swing: 0.32,
        sway: 0.28,
        bounce: 0.18,
        forward_speed: 0.35,
        root_sway: 0.07,
        vertical_amp: 0.1,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "dodge",
        freq: 2.1,
        swing: 0.38,
        sway: 0.32,
        twist: 0.25,
        bounce: 0.12,
        forward_speed: 0.15,
        root_sway: 0.09,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "sneak",
        freq: 1.3,
        swing: 0.25,
        sway: 0.18,
        twist: 0.17,
        bounce: 0.05,
        forward_speed: 0.25,
        root_sway: 0.05,
        crouch: 0.15,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "bow",
        freq: 1.0,
        swing: 0.18,
        sway: 0.1,
        twist: 0.12,
        bounce: 0.05,
        forward_speed: 0.0,
        root_sway: 0.01,
        lean: 0.35,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "recoil",
        swing: 0.3,
        sway: 0.24,
        twist: 0.22,
        bounce: 0.12,
        forward_speed: -0.05,
        root_sway: 0.04,
        vertical_amp: 0.08,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "celebrate",
        freq: 2.0,
        swing: 0.65,
        sway: 0.32,
        twist: 0.28,
        bounce: 0.2,
        forward_speed: 0.12,
        root_sway: 0.06,
        vertical_amp: 0.14,
        arm_lift: 0.25,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "robot",
        freq: 1.1,
        swing: 0.25,
        sway: 0.1,
        twist: 0.05,
        bounce: 0.04,
        forward_speed: 0.2,
        root_sway: 0.01,
        choppy: true,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "swim",
        freq: 1.7,
        swing: 0.55,
        sway: 0.15,
        twist: 0.16,
        bounce: 0.05,
        forward_speed: 0.0,
        arm_lift: 0.3,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "balance",
        freq: 1.0,
        swing: 0.18,
        sway: 0.08,
        twist: 0.08,
        bounce: 0.04,
        forward_speed: 0.0,
        crouch: 0.05,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "jump_rope",
        freq: 2.6,
        swing: 0.4,
        twist: 0.1,
        bounce: 0.15,
        forward_speed: 0.0,
        root_sway: 0.03,
        vertical_amp: 0.25,
        arm_lift: 0.15,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "salute",
        freq: 1.2,
        swing: 0.12,
        sway: 0.1,
        twist: 0.05,
        bounce: 0.02,
        forward_speed: 0.0,
        root_sway: 0.01,
        arm_lift: 0.45,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "spin",
        freq: 1.5,
        swing: 0.4,
        twist: 0.15,
        forward_speed: 0.1,
        root_sway: 0.05,
        spin: 0.6,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "stomp",
        freq: 1.8,
        swing: 0.38,
        sway: 0.22,
        bounce: 0.18,
        forward_speed: 0.2,
        root_sway: 0.03,
        vertical_amp: 0.14,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "chase",
        freq: 2.0,
        swing: 0.5,
        twist: 0.25,
        bounce: 0.14,
        forward_speed: 0.7,
        root_sway: 0.05,
        vertical_amp: 0.1,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "row",
        freq: 1.6,
        swing: 0.55,
        sway: 0.14,
        twist: 0.12,
        bounce: 0.06,
        forward_speed: 0.0,
        arm_lift: 0.1,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "stretch",
        freq: 1.0,
        swing: 0.2,
        sway: 0.08,
        twist: 0.05,
        bounce: 0.02,
        forward_speed: 0.0,
        root_sway: 0.0,
        arm_lift: 0.5,
        lean: 0.1,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "wade",
        freq: 1.2,
        swing: 0.32,
        sway: 0.15,
        twist: 0.12,
        forward_speed: 0.25,
        root_sway: 0.03,
        vertical_amp: 0.12,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "breathe",
        freq: 0.9,
        swing: 0.12,
        sway: 0.05,
        twist: 0.04,
        bounce: 0.02,
        forward_speed: 0.0,
        root_sway: 0.0,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "zombie",
        freq: 1.1,
        swing: 0.18,
        sway: 0.12,
        twist: 0.1,
        bounce: 0.06,
        forward_speed: 0.25,
        arm_lift: 0.25,
        lean: 0.1,
        choppy: true,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "reach",
        freq: 1.8,
        sway: 0.15,
        bounce: 0.1,
        forward_speed: 0.15,
        root_sway: 0.03,
        arm_lift: 0.2,
        lean: 0.15,
        ..StyleProfile::BASE
    },
    StyleProfile {
        name: "fidget",
        freq: 2.2,
        swing: 0.15,
        sway: 0.12,
        twist: 0.1,
        bounce: 0.04,
        root_sway: 0.02,
        ..StyleProfile::BASE
    },
];

/// Substring rules checked in order; the first hit names the style.
const KEYWORD_RULES: &[(&str, &str)] = &[
    ("martial", "martial"),
    ("molasses", "slow_walk"),
    ("bird", "flight"),
    ("flight", "flight"),
    ("frog", "hop"),
    ("confident", "walk_confident"),
    ("runway", "walk_confident"),
    ("model", "walk_confident"),
    ("sword", "slash"),
    ("tiptoe", "tiptoe"),
    ("dance", "dance"),
    ("hip hop", "dance"),
    ("slipping", "stumble"),
    ("ice", "stumble"),
    ("dodge", "dodge"),
    ("fight", "dodge"),
    ("sneak", "sneak"),
    ("bow", "bow"),
    ("startled", "recoil"),
    ("surprise", "recoil"),
    ("celebrat", "celebrate"),
    ("robot", "robot"),
    ("swim", "swim"),
    ("balance", "balance"),
    ("jumping rope", "jump_rope"),
    ("jump rope", "jump_rope"),
    ("salut", "salute"),
    ("spin", "spin"),
    ("stomp", "stomp"),
    ("butterfly", "chase"),
    ("chasing", "chase"),
    ("row", "row"),
    ("stretch", "stretch"),
    ("wading", "wade"),
    ("water", "wade"),
    ("backward", "walk_backward"),
    ("door", "sneak"),
    ("breath", "breathe"),
    ("zombie", "zombie"),
    ("catch", "reach"),
    ("watch", "fidget"),
];

/// Reference phrases a free-form prompt is matched against.
pub const PROMPT_LIBRARY: &[&str] = &[
    "A person is practicing martial arts in slow motion.",
    "A person is walking like they're stuck in molasses.",
    "A person is pretending to be a bird taking flight.",
    "A person is jumping like a frog.",
    "A person is walking confidently.",
    "A person is swinging a sword.",
    "A person is tiptoeing across a creaky floor.",
    "A person is dancing to hip hop music.",
    "A person is slipping on ice.",
    "A person is dodging punches in a fight.",
    "A person is sneaking through a dark alley.",
    "A person is performing a dramatic bow.",
    "A person is startled and jumps back.",
    "A person is celebrating with a joyful dance.",
    "A person walks like a robot.",
    "A person is pretending to swim on land.",
    "A person is trying to stay balanced on a narrow beam.",
    "A person is jumping rope.",
    "A person is saluting formally.",
    "A person is spinning in place like a figure skater.",
    "A person is stomping angrily while shaking their fist.",
    "A person is playfully chasing after a fluttering butterfly.",
    "A person is pretending to row a boat with slow, rhythmic strokes.",
    "A person is stretching their arms upward while yawning.",
    "A person is walking backward with exaggerated caution.",
    "A person is walking proudly like a runway model.",
    "A person is wading through water, lifting knees high with each step.",
    "A person is reacting with surprise, stepping back quickly and raising their hands.",
    "A person is cautiously opening a creaky door, peeking inside.",
    "A person is leaning forward, trying to catch their breath after running.",
    "A person is mimicking a slow, exaggerated zombie walk.",
    "A person is reaching out to catch a falling object with quick reflexes.",
    "A person is nervously checking their watch repeatedly.",
    "A person is excitedly spinning around with arms outstretched.",
];

/// The outcome of matching a prompt against the library.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleMatch {
    pub style: &'static StyleProfile,
    pub matched_prompt: &'static str,
    pub score: f64,
}

pub fn style_by_name(name: &str) -> &'static StyleProfile {
    STYLES
        .iter()
        .find(|style| style.name == name)
        .unwrap_or(&STYLES[0])
}

fn style_from_keywords(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, style)| *style)
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
}

/// Loose word equality: same initial, the shorter word a fuzzy subsequence
/// of the longer, and at least half its length.
fn words_match(matcher: &SkimMatcherV2, a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().next() == long.chars().next()
        && short.len() * 2 >= long.len()
        && matcher.fuzzy_match(long, short).is_some()
}

/// Similarity of `prompt` to a library `candidate` in `[0, 1]`.
///
/// A candidate contained in the prompt is a perfect match. Otherwise the
/// score is the share of candidate words that fuzzily occur among the
/// prompt's words.
pub fn score_prompt(matcher: &SkimMatcherV2, prompt: &str, candidate: &str) -> f64 {
    let prompt_norm = prompt.trim().to_lowercase();
    let candidate_norm = candidate.trim().to_lowercase();
    if prompt_norm.is_empty() || candidate_norm.is_empty() {
        return 0.0;
    }
    if prompt_norm.contains(&candidate_norm) {
        return 1.0;
    }
    let prompt_words: Vec<String> = words(&prompt_norm).collect();
    let candidate_words: Vec<String> = words(&candidate_norm).collect();
    if candidate_words.is_empty() {
        return 0.0;
    }
    let hits = candidate_words
        .iter()
        .filter(|cw| {
            prompt_words
                .iter()
                .any(|pw| words_match(matcher, pw, cw))
        })
        .count();
    hits as f64 / candidate_words.len() as f64
}

/// Chooses a style for `prompt`.
///
/// Keywords in the prompt itself win. Otherwise the style of the closest
/// library phrase is used, falling back to `freestyle`.
pub fn match_style(prompt: &str) -> StyleMatch {
    let matcher = SkimMatcherV2::default();
    let mut matched_prompt = PROMPT_LIBRARY[0];
    let mut best = -1.0;
    for candidate in PROMPT_LIBRARY {
        let score = score_prompt(&matcher, prompt, candidate);
        if score > best {
            best = score;
            matched_prompt = candidate;
        }
    }
    let name = style_from_keywords(prompt)
        .or_else(|| style_from_keywords(matched_prompt))
        .unwrap_or("freestyle");
    StyleMatch {
        style: style_by_name(name),
        matched_prompt,
        score: best.max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_every_rule_names_a_style() {
        for (_, style) in KEYWORD_RULES {
            assert_eq!(style_by_name(style).name, *style);
        }
    }

    #[test]
    fn test_keyword_in_prompt_wins() {
        let m = match_style("Let me show you my robot impression");
        assert_eq!(m.style.name, "robot");
    }

    #[test]
    fn test_library_phrase_is_perfect_match() {
        let m = match_style("well, A person is jumping like a frog. ok");
        assert_relative_eq!(m.score, 1.0);
        assert_eq!(m.matched_prompt, "A person is jumping like a frog.");
        assert_eq!(m.style.name, "hop");
    }

    #[test]
    fn test_unmatched_prompt_is_freestyle_or_library_style() {
        let m = match_style("");
        assert_relative_eq!(m.score, 0.0);
        assert_eq!(m.style.name, style_from_keywords(m.matched_prompt).unwrap_or("freestyle"));
    }

    #[test]
    fn test_jitter_is_seeded() {
        let base = style_by_name("dance");
        let a = base.jittered(&mut StdRng::seed_from_u64(7));
        let b = base.jittered(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!((a.freq / base.freq - 1.0).abs() <= 0.08);
        assert_eq!(a.name, "dance");
    }
}
