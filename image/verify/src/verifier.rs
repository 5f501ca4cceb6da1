/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    This file is the main implementation of the boot gate image verifier.
    It sequences parsing, digesting, the hash and certificate policy, the
    signature check and the SBAT revocation check into one verdict.

--*/

use alloc::vec::Vec;

use bootgate_drivers::cprintln;
use bootgate_drivers::printer::HexBytes;
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::{ImageDigests, Sha256Digest};

use crate::*;

/// How an accepted image was trusted
struct Acceptance {
    reason: VerificationReason,
    anchor: Option<AnchorId>,
    anchor_entry_digest: Option<Sha256Digest>,
}

/// Bookkeeping for one pipeline pass
#[derive(Default)]
struct Pass {
    trace: Vec<StateTransition>,
    method: VerificationMethod,
    digests: Option<ImageDigests>,
    flags: PolicyFlags,
}

impl Pass {
    fn enter(&mut self, state: VerificationState) {
        self.trace.push(StateTransition {
            state,
            method: self.method,
        });
    }

    fn finish(mut self, result: BootGateResult<Acceptance>) -> VerificationVerdict {
        self.enter(VerificationState::Verdict);
        match result {
            Ok(acceptance) => {
                cprintln!(
                    "[verify] Image accepted: {}",
                    acceptance.reason.description()
                );
                VerificationVerdict {
                    outcome: VerificationOutcome::Accept,
                    reason: acceptance.reason,
                    anchor: acceptance.anchor,
                    anchor_entry_digest: acceptance.anchor_entry_digest,
                    method: self.method,
                    error: None,
                    digests: self.digests,
                    flags: self.flags,
                    trace: self.trace,
                }
            }
            Err(err) => {
                let reason = VerificationReason::from_error(err);
                cprintln!(
                    "[verify] Image rejected: {} (0x{})",
                    reason.description(),
                    HexBytes(&u32::from(err).to_be_bytes())
                );
                VerificationVerdict {
                    outcome: VerificationOutcome::Reject,
                    reason,
                    anchor: None,
                    anchor_entry_digest: None,
                    method: VerificationMethod::Nothing,
                    error: Some(err),
                    digests: self.digests,
                    flags: self.flags,
                    trace: self.trace,
                }
            }
        }
    }
}

/// Image Verifier
pub struct ImageVerifier<Env: ImageVerificationEnv> {
    /// Verification Environment
    env: Env,
}

impl<Env: ImageVerificationEnv> ImageVerifier<Env> {
    /// Create a new instance `ImageVerifier`
    ///
    /// # Arguments
    ///
    /// * `env` - Environment
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    pub fn into_env(self) -> Env {
        self.env
    }

    /// Verify an image occupying the whole buffer
    pub fn verify(&mut self, image: &[u8], ctx: &VerificationContext) -> VerificationVerdict {
        self.verify_with_size(image, image.len(), ctx)
    }

    /// Verify an image
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer holding the image
    /// * `size`   - Declared image size
    /// * `ctx`    - How the image's loader was trusted
    ///
    /// # Returns
    ///
    /// * `VerificationVerdict` - Outcome, reason, and the anchor and method on
    ///   accept. Every failure is a rejection.
    pub fn verify_with_size(
        &mut self,
        buffer: &[u8],
        size: usize,
        ctx: &VerificationContext,
    ) -> VerificationVerdict {
        let mut pass = Pass::default();
        let result = self.run(&mut pass, buffer, size, ctx);
        pass.finish(result)
    }

    fn run(
        &mut self,
        pass: &mut Pass,
        buffer: &[u8],
        size: usize,
        vctx: &VerificationContext,
    ) -> BootGateResult<Acceptance> {
        pass.enter(VerificationState::Parsing);
        let ctx = ImageContext::parse_with_size(buffer, size)?;

        pass.enter(VerificationState::Digesting);
        let digests = compute_digests(&mut self.env, &ctx)?;
        pass.digests = Some(digests);
        cprintln!("[verify] SHA-256: {}", HexBytes(&digests.sha256));

        pass.enter(VerificationState::PolicyCheck);
        let snapshot = self.env.trust_snapshot()?;
        pass.flags = snapshot.flags;
        if snapshot.flags.contains(PolicyFlags::REQUIRE_NX) {
            ctx.check_nx_policy()?;
        }
        let acceptance = match self.check_policy(&ctx, &digests, &snapshot, vctx)? {
            Some(acceptance) => acceptance,
            None => {
                pass.enter(VerificationState::SignatureCheck);
                self.check_signature(&ctx, &digests, &snapshot)?
            }
        };
        pass.method.update(match acceptance.reason {
            VerificationReason::HashAllowListed => VerificationMethod::ByHash,
            VerificationReason::ParentVerified => vctx.parent_method,
            _ => VerificationMethod::ByCertificate,
        });

        pass.enter(VerificationState::RevocationCheck);
        let records = read_sbat_records(&ctx)?;
        check_revocation(records.as_deref(), &snapshot.revocation)?;

        Ok(acceptance)
    }

    /// Deny lists first, then the verified-parent shortcut, then allow lists.
    /// `None` leaves the decision to the signature check.
    fn check_policy(
        &mut self,
        ctx: &ImageContext,
        digests: &ImageDigests,
        snapshot: &TrustSnapshot,
        vctx: &VerificationContext,
    ) -> BootGateResult<Option<Acceptance>> {
        let decision = evaluate_hash_policy(digests, &snapshot.anchors, snapshot.flags);
        if let HashPolicyDecision::Deny { anchor, .. } = decision {
            cprintln!("[verify] Image hash is in {}", anchor.name());
            return Err(BootGateError::POLICY_HASH_DENY_LISTED);
        }
        let denied_signer =
            check_denied_signatures(&mut self.env, ctx, digests, &snapshot.anchors)?;
        if let Some(anchor) = denied_signer {
            cprintln!("[verify] Image signer is in {}", anchor.name());
            return Err(BootGateError::POLICY_CERT_DENY_LISTED);
        }

        if vctx.parent_verified {
            return Ok(Some(Acceptance {
                reason: VerificationReason::ParentVerified,
                anchor: None,
                anchor_entry_digest: None,
            }));
        }

        if let HashPolicyDecision::Allow { anchor, digest } = decision {
            cprintln!("[verify] Image hash is in {}", anchor.name());
            return Ok(Some(Acceptance {
                reason: VerificationReason::HashAllowListed,
                anchor: Some(anchor),
                anchor_entry_digest: Some(self.env.sha256_digest(digest.as_bytes())?),
            }));
        }
        Ok(None)
    }

    fn check_signature(
        &mut self,
        ctx: &ImageContext,
        digests: &ImageDigests,
        snapshot: &TrustSnapshot,
    ) -> BootGateResult<Acceptance> {
        let report = verify_signatures(
            &mut self.env,
            ctx,
            digests,
            &snapshot.anchors,
            snapshot.flags,
        )?;
        let matched = report.into_match()?;
        Ok(Acceptance {
            reason: VerificationReason::SignatureValid,
            anchor: Some(matched.anchor),
            anchor_entry_digest: Some(matched.cert_digest),
        })
    }
}
