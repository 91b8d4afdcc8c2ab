use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const PAD_TOKEN_ID: i64 = 0;
pub const EOS_TOKEN_ID: i64 = 1;
pub const UNK_TOKEN_ID: i64 = 2;

/// SentencePiece whitespace marker.
const SPACE_MARKER: char = '\u{2581}';
/// Space id in the character-fallback codec.
const FALLBACK_SPACE_ID: i64 = 3;
/// Fallback char ids start past the special-token range.
const FALLBACK_CHAR_OFFSET: i64 = 100;
/// Longest vocabulary piece tried during greedy matching.
const MAX_PIECE_CHARS: usize = 50;

const TASK_PREFIX: &str = "grammar: ";

/// Which codec is active. The character fallback is a first-class variant,
/// not a hidden runtime branch: it is selected once when (and only when)
/// no usable vocabulary was loaded.
enum VocabCodec {
    Loaded {
        token_to_id: HashMap<String, i64>,
        id_to_token: HashMap<i64, String>,
    },
    CharFallback,
}

/// Approximate T5/SentencePiece codec.
///
/// Greedy longest-match against a loaded vocabulary; a deterministic
/// per-character mapping when none is available. Special ids follow the T5
/// convention: `<pad>` = 0, `</s>` = 1, `<unk>` = 2.
pub struct T5Tokenizer {
    codec: VocabCodec,
}

impl Default for T5Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl T5Tokenizer {
    pub fn new() -> Self {
        Self {
            codec: VocabCodec::CharFallback,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.codec, VocabCodec::Loaded { .. })
    }

    pub fn eos_token_id(&self) -> i64 {
        EOS_TOKEN_ID
    }

    pub fn pad_token_id(&self) -> i64 {
        PAD_TOKEN_ID
    }

    /// Best-effort vocabulary load. Returns false (and keeps the character
    /// fallback) on any problem; never an error to the caller.
    pub fn load_vocab(&mut self, vocab_path: &Path) -> bool {
        let content = match fs::read_to_string(vocab_path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!(
                    "[T5Tokenizer] vocab file {} unreadable ({e}), using character fallback",
                    vocab_path.display()
                );
                return false;
            }
        };

        let is_json = vocab_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            parse_json_vocab(&content)
        } else {
            parse_tsv_vocab(&content)
        };

        match parsed {
            Some(token_to_id) if !token_to_id.is_empty() => {
                println!("[T5Tokenizer] loaded {} tokens", token_to_id.len());
                let id_to_token = token_to_id
                    .iter()
                    .map(|(tok, id)| (*id, tok.clone()))
                    .collect();
                self.codec = VocabCodec::Loaded {
                    token_to_id,
                    id_to_token,
                };
                true
            }
            _ => {
                eprintln!(
                    "[T5Tokenizer] no usable vocabulary in {}, using character fallback",
                    vocab_path.display()
                );
                false
            }
        }
    }

    /// Text to symbol sequence, terminated by the EOS marker.
    pub fn encode(&self, text: &str, add_task_prefix: bool) -> Vec<i64> {
        let processed: String = if add_task_prefix {
            format!("{TASK_PREFIX}{text}")
        } else {
            text.to_string()
        };

        let mut ids = Vec::new();

        match &self.codec {
            VocabCodec::Loaded { token_to_id, .. } => {
                let marked = processed.replace(' ', &SPACE_MARKER.to_string());
                let chars: Vec<char> = marked.chars().collect();
                let mut pos = 0;
                while pos < chars.len() {
                    let remaining = chars.len() - pos;
                    let mut matched = false;
                    for len in (1..=remaining.min(MAX_PIECE_CHARS)).rev() {
                        let candidate: String = chars[pos..pos + len].iter().collect();
                        if let Some(id) = token_to_id.get(&candidate) {
                            ids.push(*id);
                            pos += len;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        // No piece covers the leading char: emit <unk>, skip one.
                        ids.push(UNK_TOKEN_ID);
                        pos += 1;
                    }
                }
            }
            VocabCodec::CharFallback => {
                for c in processed.chars() {
                    let id = match c {
                        ' ' => FALLBACK_SPACE_ID,
                        _ => c as i64 + FALLBACK_CHAR_OFFSET,
                    };
                    ids.push(id);
                }
            }
        }

        ids.push(EOS_TOKEN_ID);
        ids
    }

    /// Symbol sequence back to text. Stops at EOS or pad; `<unk>` renders as
    /// a literal placeholder.
    pub fn decode(&self, ids: &[i64]) -> String {
        let mut out = String::new();

        for &id in ids {
            match id {
                PAD_TOKEN_ID | EOS_TOKEN_ID => break,
                UNK_TOKEN_ID => out.push('?'),
                _ => match &self.codec {
                    VocabCodec::Loaded { id_to_token, .. } => match id_to_token.get(&id) {
                        Some(token) => {
                            out.push_str(&token.replace(SPACE_MARKER, " "));
                        }
                        None => out.push('?'),
                    },
                    VocabCodec::CharFallback => {
                        if id == FALLBACK_SPACE_ID {
                            out.push(' ');
                        } else if id > FALLBACK_CHAR_OFFSET {
                            if let Some(c) = char::from_u32((id - FALLBACK_CHAR_OFFSET) as u32) {
                                out.push(c);
                            }
                        }
                    }
                },
            }
        }

        out.trim().to_string()
    }
}

/// HuggingFace tokenizer.json: `model.vocab` as either a `{token: id}` map
/// (BPE/WordPiece) or a Unigram array `[[token, score], ..]` where the index
/// is the id.
fn parse_json_vocab(content: &str) -> Option<HashMap<String, i64>> {
    let root: serde_json::Value = serde_json::from_str(content).ok()?;
    let vocab = root.get("model")?.get("vocab")?;

    let mut map = HashMap::new();
    match vocab {
        serde_json::Value::Object(entries) => {
            for (token, id) in entries {
                if let Some(id) = id.as_i64() {
                    map.insert(token.clone(), id);
                }
            }
        }
        serde_json::Value::Array(entries) => {
            for (idx, entry) in entries.iter().enumerate() {
                if let Some(token) = entry.get(0).and_then(|t| t.as_str()) {
                    map.insert(token.to_string(), idx as i64);
                }
            }
        }
        _ => return None,
    }
    Some(map)
}

/// `token\tid` lines; a missing id column falls back to the line index.
fn parse_tsv_vocab(content: &str) -> Option<HashMap<String, i64>> {
    let mut map = HashMap::new();
    for (idx, line) in content.lines().enumerate() {
        let mut parts = line.split('\t');
        let token = match parts.next() {
            Some(t) if !t.is_empty() => t,
            _ => continue,
        };
        let id = parts
            .next()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(idx as i64);
        map.insert(token.to_string(), id);
    }
    Some(map)
}
