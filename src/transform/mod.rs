//! The byte-block transform pipeline that sits between framing and field
//! decoding.

pub mod rsa;
pub mod xtea;

use std::collections::HashMap;

use crate::schema::TransformSpec;
use crate::value::Value;

/// Context shared by every transform stage across every message of one
/// connection. Lives as long as the connection, not the message, since
/// some protocols (this pipeline's motivating case) establish a session
/// key on the first message and use it for every later one.
pub type TransformContext = HashMap<String, Value>;

/// One stage of the pipeline: a pure `(bytes, context) -> bytes` function
/// with a name.
pub trait Transform {
    fn name(&self) -> &str;

    /// Rewrite `input`, optionally reading or writing `ctx`. A transform
    /// that cannot apply (bad key, short input, ...) returns `input`
    /// unchanged rather than failing — transform-failure is always a
    /// non-fatal identity per spec §7.
    fn apply(&self, input: &[u8], ctx: &mut TransformContext) -> Vec<u8>;

    /// Whether this transform has a paired inverse (spec §9's "replay of
    /// encrypted protocols" open question). `None` by default.
    fn invert(&self) -> Option<Box<dyn Transform>> {
        None
    }
}

/// An ordered chain of transforms, applied in declaration order.
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Transform>>) -> Self {
        Pipeline { stages }
    }

    /// Build a pipeline from a schema's declared transform list.
    pub fn from_specs(specs: &[TransformSpec]) -> Pipeline {
        let stages = specs
            .iter()
            .filter_map(|spec| build_transform(spec))
            .collect();
        Pipeline::new(stages)
    }

    pub fn apply(&self, input: &[u8], ctx: &mut TransformContext) -> Vec<u8> {
        let mut block = input.to_vec();
        for stage in &self.stages {
            block = stage.apply(&block, ctx);
        }
        block
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Build the inverse pipeline (stages in reverse order, each inverted),
    /// for a caller that wants to re-encrypt a plaintext log trace before
    /// replaying it. `None` if any stage has no inverse.
    pub fn invert(&self) -> Option<Pipeline> {
        let mut inverted = Vec::with_capacity(self.stages.len());
        for stage in self.stages.iter().rev() {
            inverted.push(stage.invert()?);
        }
        Some(Pipeline::new(inverted))
    }
}

fn build_transform(spec: &TransformSpec) -> Option<Box<dyn Transform>> {
    match spec.kind.as_str() {
        "xtea" => Some(Box::new(xtea::XteaTransform::from_options(&spec.options))),
        "raw_rsa" | "rsa" => Some(Box::new(rsa::RawRsaTransform::from_options(&spec.options))),
        other => {
            tracing::warn!(kind = other, "unknown transform kind, skipping");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Identity;
    impl Transform for Identity {
        fn name(&self) -> &str {
            "identity"
        }
        fn apply(&self, input: &[u8], _ctx: &mut TransformContext) -> Vec<u8> {
            input.to_vec()
        }
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let pipeline = Pipeline::new(vec![]);
        let mut ctx = TransformContext::new();
        let input = vec![1, 2, 3, 4];
        assert_eq!(pipeline.apply(&input, &mut ctx), input);
    }

    #[test]
    fn stages_compose_in_order() {
        let pipeline = Pipeline::new(vec![Box::new(Identity), Box::new(Identity)]);
        let mut ctx = TransformContext::new();
        let input = vec![5, 6, 7];
        assert_eq!(pipeline.apply(&input, &mut ctx), input);
    }

    /// Spec §9's "replay of encrypted protocols" open question, decided in
    /// SPEC_FULL.md §7: an XTEA-only pipeline is invertible, and encrypting
    /// through the inverse then decrypting through the original recovers
    /// the plaintext.
    #[test]
    fn invert_round_trips_an_xtea_pipeline() {
        let spec = crate::schema::TransformSpec {
            kind: "xtea".into(),
            options: serde_json::json!({ "key": "00112233445566778899AABBCCDDEEFF" }),
        };
        let pipeline = Pipeline::from_specs(&[spec]);
        let inverted = pipeline.invert().expect("xtea pipeline should be invertible");

        let plaintext = b"ABCDEFGH".to_vec();
        let mut ctx = TransformContext::new();
        let ciphertext = inverted.apply(&plaintext, &mut ctx);

        let mut ctx = TransformContext::new();
        let roundtrip = pipeline.apply(&ciphertext, &mut ctx);
        assert_eq!(roundtrip, plaintext);
    }

    /// `RawRsaTransform` has no inverse (no public key is modeled per
    /// SPEC_FULL.md §7), so a pipeline containing one must not invert.
    #[test]
    fn invert_is_none_when_pipeline_contains_raw_rsa() {
        let spec = crate::schema::TransformSpec {
            kind: "raw_rsa".into(),
            options: serde_json::json!({}),
        };
        let pipeline = Pipeline::from_specs(&[spec]);
        assert!(pipeline.invert().is_none());
    }
}
