/// Bedrock model families the gateway can translate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Anthropic,
    CohereCommand,
    CohereEmbed,
    Ai21,
    TitanText,
    TitanEmbed,
    Llama2,
    Llama3,
    Mistral,
    StabilityV1,
    StabilityV2,
}

impl ModelFamily {
    /// Classify a Bedrock model identifier.
    pub fn detect(model_id: &str) -> Option<Self> {
        // Cross-region inference profiles prefix the vendor id ("us.anthropic…")
        let id = model_id
            .split_once('.')
            .filter(|(prefix, _)| prefix.len() == 2 || prefix.len() == 4)
            .map(|(_, rest)| rest)
            .unwrap_or(model_id);

        if id.starts_with("anthropic.") {
            Some(ModelFamily::Anthropic)
        } else if id.starts_with("cohere.embed") {
            Some(ModelFamily::CohereEmbed)
        } else if id.starts_with("cohere.") {
            Some(ModelFamily::CohereCommand)
        } else if id.starts_with("ai21.") {
            Some(ModelFamily::Ai21)
        } else if id.starts_with("amazon.titan-embed") {
            Some(ModelFamily::TitanEmbed)
        } else if id.starts_with("amazon.titan") {
            Some(ModelFamily::TitanText)
        } else if id.starts_with("meta.llama2") {
            Some(ModelFamily::Llama2)
        } else if id.starts_with("meta.llama3") || id.starts_with("meta.llama") {
            Some(ModelFamily::Llama3)
        } else if id.starts_with("mistral.") {
            Some(ModelFamily::Mistral)
        } else if id.starts_with("stability.stable-diffusion") {
            Some(ModelFamily::StabilityV1)
        } else if id.starts_with("stability.") {
            Some(ModelFamily::StabilityV2)
        } else {
            None
        }
    }

    /// Whether chat for this model goes through the unified Converse API.
    /// Invoke-only models need family-specific payloads and prompt dialects.
    pub fn converse_eligible(&self, model_id: &str) -> bool {
        const INVOKE_ONLY: &[&str] = &[
            "command-text-v14",
            "command-light-text-v14",
            "j2-mid-v1",
            "j2-ultra-v1",
        ];
        if INVOKE_ONLY.iter().any(|suffix| model_id.contains(suffix)) {
            return false;
        }
        match self {
            ModelFamily::Anthropic | ModelFamily::CohereCommand | ModelFamily::Mistral => true,
            // Llama 3 chat models converse; Llama 2 and Titan text stay on invoke
            ModelFamily::Llama3 => true,
            ModelFamily::Llama2 | ModelFamily::TitanText | ModelFamily::Ai21 => false,
            ModelFamily::CohereEmbed
            | ModelFamily::TitanEmbed
            | ModelFamily::StabilityV1
            | ModelFamily::StabilityV2 => false,
        }
    }

    /// Families that reject tool/system cache points (Converse restriction).
    pub fn allows_cache_points(&self) -> bool {
        !matches!(self, ModelFamily::TitanText | ModelFamily::TitanEmbed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Anthropic => "anthropic",
            ModelFamily::CohereCommand => "cohere-command",
            ModelFamily::CohereEmbed => "cohere-embed",
            ModelFamily::Ai21 => "ai21",
            ModelFamily::TitanText => "titan-text",
            ModelFamily::TitanEmbed => "titan-embed",
            ModelFamily::Llama2 => "llama2",
            ModelFamily::Llama3 => "llama3",
            ModelFamily::Mistral => "mistral",
            ModelFamily::StabilityV1 => "stability-v1",
            ModelFamily::StabilityV2 => "stability-v2",
        }
    }
}
