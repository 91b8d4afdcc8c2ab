/// Layout of a cached decoder's past-key-value inputs, inferred from graph
/// metadata at load time.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    /// Past-key-value input names in graph declaration order.
    pub slot_names: Vec<String>,
    /// Attention heads per layer.
    pub num_heads: usize,
    /// Per-head dimension, `hidden_dim / num_heads`.
    pub head_dim: usize,
}

/// How a decoder graph expects to be called across generation steps.
#[derive(Debug, Clone)]
pub enum DecoderConvention {
    /// No cache inputs; the full target prefix is re-fed every step.
    Stateless,
    /// Separate past-key-value inputs; only the newest token is fed after
    /// the first step.
    Cached(CacheLayout),
    /// Cached plus a boolean selector that switches between the prefill
    /// branch and the incremental branch of a merged graph.
    Merged {
        cache: CacheLayout,
        use_cache_input: String,
    },
}

impl DecoderConvention {
    pub fn cache_layout(&self) -> Option<&CacheLayout> {
        match self {
            Self::Stateless => None,
            Self::Cached(layout) => Some(layout),
            Self::Merged { cache, .. } => Some(cache),
        }
    }
}

/// Greedy decode result.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    /// Generated ids including the leading start token, excluding EOS.
    pub token_ids: Vec<i64>,
    /// Decoder invocations performed.
    pub steps: usize,
}
