/*++

Licensed under the Apache-2.0 license.

File Name:

    hash_policy.rs

Abstract:

    Lookup of image digests in the deny and allow hash lists.

--*/

use bootgate_image_types::{ImageDigest, ImageDigests};

use crate::{AnchorId, PolicyFlags, TrustAnchor, TrustAnchors};

/// Outcome of the hash list lookup
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashPolicyDecision {
    /// A deny list holds one of the digests
    Deny {
        anchor: AnchorId,
        digest: ImageDigest,
    },

    /// An allow list holds one of the digests
    Allow {
        anchor: AnchorId,
        digest: ImageDigest,
    },

    NoMatch,
}

fn find_digest<'a>(
    mut anchors: impl Iterator<Item = &'a TrustAnchor>,
    digests: &ImageDigests,
) -> Option<(AnchorId, ImageDigest)> {
    anchors.find_map(|anchor| {
        digests
            .iter()
            .find(|digest| anchor.entries.iter().any(|e| e.matches_digest(digest)))
            .map(|digest| (anchor.id, digest))
    })
}

/// Evaluate the hash lists. A deny match on any digest wins over everything
/// else; otherwise an allow match on any digest is reported.
pub fn evaluate_hash_policy(
    digests: &ImageDigests,
    anchors: &TrustAnchors,
    flags: PolicyFlags,
) -> HashPolicyDecision {
    if let Some((anchor, digest)) = find_digest(anchors.deny_anchors(), digests) {
        return HashPolicyDecision::Deny { anchor, digest };
    }
    if let Some((anchor, digest)) = find_digest(anchors.allow_anchors(flags), digests) {
        return HashPolicyDecision::Allow { anchor, digest };
    }
    HashPolicyDecision::NoMatch
}
