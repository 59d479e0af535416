use serde::{Deserialize, Serialize};

/// `{ body, content_type }` — the payload recognized inside one envelope (§4.5). Both fields
/// are optional: an envelope that commits with no body and/or no `content-type` field is still
/// a valid (if useless) inscription.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Inscription {
    pub content_type: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

impl Inscription {
    pub fn content_type_str(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

/// Non-fatal flag attached to an otherwise successfully extracted inscription (§4.6 Step B).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Curse {
    NotInFirstInput,
    NotAtOffsetZero,
    Reinscription,
}

/// One inscription as emitted by the envelope parser (C5), before the updater (C6) has assigned
/// it an `InscriptionId` or resolved its curses.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TransactionInscription {
    pub inscription: Inscription,
    pub tx_in_index: u32,
    pub tx_in_offset: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn content_type_str_decodes_utf8() {
        let inscription = Inscription {
            content_type: Some(b"text/plain".to_vec()),
            body: None,
        };
        assert_eq!(inscription.content_type_str(), Some("text/plain"));
    }

    #[test]
    fn content_type_str_is_none_when_absent() {
        let inscription = Inscription::default();
        assert_eq!(inscription.content_type_str(), None);
    }
}
