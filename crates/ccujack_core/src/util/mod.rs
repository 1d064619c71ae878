// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

pub mod async_manager;
pub mod json;

use std::time::Duration;

pub async fn sleep(duration: Duration) {
  tokio::time::sleep(duration).await;
}
