//! Catalog of the Groq models a chat may select.

use serde::Serialize;

/// Model used when a chat has never chosen one.
pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

/// Speech-to-text model used for voice messages.
pub const WHISPER_MODEL: &str = "whisper-large-v3";

/// Longest voice message accepted, in seconds.
pub const MAX_VOICE_DURATION_SECS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    /// Total tokens the model can attend to (prompt + completion).
    pub context_window: u32,
    /// Upper bound accepted for a chat's `max_tokens`.
    pub max_output_tokens: u32,
    /// `max_tokens` a chat starts with when it selects this model.
    pub default_max_tokens: u32,
    pub description: &'static str,
    pub use_case: &'static str,
    pub features: &'static str,
    pub limits: &'static str,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "llama3-70b-8192",
        context_window: 8192,
        max_output_tokens: 8192,
        default_max_tokens: 3000,
        description: "Meta Llama 3 70B, the large general-purpose model",
        use_case: "complex questions, reasoning, longer answers",
        features: "strong instruction following, good multilingual quality",
        limits: "8K context, 6K tokens/min on the free tier",
    },
    ModelInfo {
        name: "llama3-8b-8192",
        context_window: 8192,
        max_output_tokens: 8192,
        default_max_tokens: 2048,
        description: "Meta Llama 3 8B, small and fast",
        use_case: "quick answers to simple questions",
        features: "very low latency, generous rate limits",
        limits: "8K context, 30K tokens/min on the free tier",
    },
    ModelInfo {
        name: "llama-3.3-70b-versatile",
        context_window: 131_072,
        max_output_tokens: 32_768,
        default_max_tokens: 4096,
        description: "Meta Llama 3.3 70B with a long context window",
        use_case: "long conversations, summarising big threads",
        features: "128K context, tool-use friendly",
        limits: "100K tokens/day on the free tier",
    },
    ModelInfo {
        name: "llama-3.1-8b-instant",
        context_window: 131_072,
        max_output_tokens: 8192,
        default_max_tokens: 2048,
        description: "Meta Llama 3.1 8B tuned for instant replies",
        use_case: "chatty groups with many short messages",
        features: "128K context, lowest latency",
        limits: "500K tokens/day on the free tier",
    },
    ModelInfo {
        name: "mistral-saba-24b",
        context_window: 32_768,
        max_output_tokens: 8192,
        default_max_tokens: 3000,
        description: "Mistral Saba 24B, a mid-sized universal model",
        use_case: "everyday use when the 70B models are rate limited",
        features: "32K context, good with Middle Eastern and South Asian languages",
        limits: "6K tokens/min on the free tier",
    },
    ModelInfo {
        name: "gemma2-9b-it",
        context_window: 8192,
        max_output_tokens: 8192,
        default_max_tokens: 2048,
        description: "Google Gemma 2 9B instruction tuned",
        use_case: "simple requests, light chit-chat",
        features: "compact, fast",
        limits: "8K context, 15K tokens/min on the free tier",
    },
    ModelInfo {
        name: "deepseek-r1-distill-llama-70b",
        context_window: 131_072,
        max_output_tokens: 16_384,
        default_max_tokens: 4096,
        description: "DeepSeek R1 reasoning distilled into Llama 70B",
        use_case: "maths, logic puzzles, step-by-step reasoning",
        features: "thinks before answering (the thinking is hidden from the chat)",
        limits: "no daily token cap, 6K tokens/min on the free tier",
    },
];

/// Look a model up by its exact API name.
pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name == name)
}

pub fn default_model() -> &'static ModelInfo {
    &MODELS[0]
}

/// Comma-separated list of every selectable model name.
pub fn model_names() -> String {
    MODELS.iter().map(|m| m.name).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_in_catalog() {
        assert_eq!(default_model().name, DEFAULT_MODEL);
        assert!(find_model(DEFAULT_MODEL).is_some());
    }

    #[test]
    fn defaults_fit_under_ceilings() {
        for model in MODELS {
            assert!(model.default_max_tokens > 0, "{}", model.name);
            assert!(model.default_max_tokens <= model.max_output_tokens, "{}", model.name);
            assert!(model.max_output_tokens <= model.context_window, "{}", model.name);
        }
    }

    #[test]
    fn unknown_model_is_not_found() {
        assert!(find_model("gpt-4").is_none());
        assert!(find_model("LLAMA3-70B-8192").is_none());
    }
}
