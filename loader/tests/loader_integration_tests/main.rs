// Licensed under the Apache-2.0 license

mod helpers;

mod test_image_verification;
mod test_load_chain;
mod test_policy_updates;
