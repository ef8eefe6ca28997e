//! Sub-lun clone support: splitting a block span into ZAPI sized ranges and
//! waiting on asynchronous clone jobs.
/**
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::ClonePollConfig;
use crate::element::Element;
use crate::error::*;
use crate::transport::Transport;

use log::{debug, warn};

/// Most blocks a single block-range may cover
pub const BLOCK_COUNT_LIMIT: u64 = 1 << 24;
/// Most block-range entries a single clone request may carry
pub const BLOCK_RANGE_LIMIT: u64 = 32;
/// Most blocks a single clone request may cover
pub const CALL_BLOCK_LIMIT: u64 = BLOCK_COUNT_LIMIT * BLOCK_RANGE_LIMIT;

/// Which part of a lun to clone.  All zero clones the whole lun.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlockSpan {
    pub src_block: u64,
    pub dest_block: u64,
    pub block_count: u64,
}

impl BlockSpan {
    pub fn whole() -> Self {
        BlockSpan::default()
    }

    pub fn blocks(block_count: u64) -> Self {
        BlockSpan {
            block_count,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockRange {
    pub source: u64,
    pub destination: u64,
    pub count: u64,
}

impl BlockRange {
    fn to_element(&self) -> Element {
        let source = self.source.to_string();
        let destination = self.destination.to_string();
        let count = self.count.to_string();
        Element::with_children(
            "block-range",
            vec![
                ("source-block-number", source.as_str()),
                ("destination-block-number", destination.as_str()),
                ("block-count", count.as_str()),
            ],
        )
    }
}

/// Split a span into one list of ranges per clone request.
///
/// There is always at least one request.  Offsets advance across ranges
/// and across requests.
pub fn plan_block_ranges(span: BlockSpan) -> Vec<Vec<BlockRange>> {
    let calls = std::cmp::max(
        1,
        (span.block_count + CALL_BLOCK_LIMIT - 1) / CALL_BLOCK_LIMIT,
    );
    let mut remaining = span.block_count;
    let mut source = span.src_block;
    let mut destination = span.dest_block;

    let mut plan = Vec::with_capacity(calls as usize);
    for _ in 0..calls {
        let mut call_blocks = std::cmp::min(remaining, CALL_BLOCK_LIMIT);
        remaining -= call_blocks;
        let mut ranges = Vec::new();
        while call_blocks > 0 {
            let count = std::cmp::min(call_blocks, BLOCK_COUNT_LIMIT);
            ranges.push(BlockRange {
                source,
                destination,
                count,
            });
            source += count;
            destination += count;
            call_blocks -= count;
        }
        plan.push(ranges);
    }
    plan
}

/// The `block-ranges` node for one request, `None` when there is nothing
/// to send
pub fn block_ranges_element(ranges: &[BlockRange]) -> Option<Element> {
    if ranges.is_empty() {
        return None;
    }
    let mut e = Element::new("block-ranges");
    for range in ranges {
        e.add_child(range.to_element());
    }
    Some(e)
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, interval: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, interval: Duration) {
        thread::sleep(interval);
    }
}

/// Shared flag that stops an in flight clone wait.  Once cancelled it
/// stops every later wait too, until `reset`.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Identifies a clone started with clone-start
#[derive(Clone, Debug, PartialEq)]
pub struct CloneJob {
    pub clone_op_id: String,
    pub volume_uuid: String,
}

impl CloneJob {
    /// Read the job id out of a clone-start response.  `None` means the
    /// array finished the clone synchronously.
    pub fn from_start_response(results: &Element) -> Option<CloneJob> {
        let info = results.children_of("clone-id").first()?;
        let volume_uuid = info.child_content("volume-uuid")?;
        Some(CloneJob {
            clone_op_id: info.child_content("clone-op-id").unwrap_or_default().to_string(),
            volume_uuid: volume_uuid.to_string(),
        })
    }

    fn status_request(&self) -> Element {
        let mut request = Element::new("clone-list-status");
        let mut id = Element::new("clone-id");
        id.add_node_with_children(
            "clone-id-info",
            vec![
                ("clone-op-id", self.clone_op_id.as_str()),
                ("volume-uuid", self.volume_uuid.as_str()),
            ],
        );
        request.add_child(id);
        request
    }
}

/// Polls clone-list-status until a job completes, fails, runs out of
/// attempts or is cancelled
pub struct ClonePoller {
    poll: ClonePollConfig,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancelToken,
}

impl ClonePoller {
    pub fn new(poll: ClonePollConfig) -> Self {
        ClonePoller {
            poll,
            sleeper: Arc::new(ThreadSleeper),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn wait(&self, transport: &dyn Transport, job: &CloneJob) -> StorageResult<()> {
        let request = job.status_request();
        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled(format!(
                    "clone {} on volume {}",
                    job.clone_op_id, job.volume_uuid
                )));
            }
            if let Some(max) = self.poll.max_attempts {
                if attempts >= max {
                    return Err(StorageError::Timeout(format!(
                        "clone {} on volume {} still running after {} status checks",
                        job.clone_op_id, job.volume_uuid, attempts
                    )));
                }
            }
            attempts += 1;

            let results = transport.invoke(&request, true)?;
            let entries = results.children_of("status");
            let failed = entries.iter().find(|info| match info.child_content("clone-state") {
                Some("running") | Some("completed") => false,
                _ => true,
            });
            if let Some(info) = failed {
                warn!(
                    "Clone {} ended in state {:?}",
                    job.clone_op_id,
                    info.child_content("clone-state").unwrap_or_default()
                );
                return Err(StorageError::Clone {
                    code: info.child_content("error").unwrap_or_default().to_string(),
                    reason: info.child_content("reason").unwrap_or_default().to_string(),
                });
            }
            // No entries means the job is not reported yet
            if entries.is_empty()
                || entries
                    .iter()
                    .any(|info| info.child_content("clone-state") == Some("running"))
            {
                debug!("Clone {} still running", job.clone_op_id);
                self.sleeper.sleep(self.poll.interval);
                continue;
            }
            debug!("Clone {} completed", job.clone_op_id);
            return Ok(());
        }
    }
}

#[cfg(test)]
use crate::testing::{CountingSleeper, ScriptedTransport};

#[cfg(test)]
fn status_xml(state: &str) -> String {
    format!(
        r#"<results status="passed"><status><ops-info>
             <clone-state>{}</clone-state><error>14575</error><reason>no space</reason>
           </ops-info></status></results>"#,
        state
    )
}

#[cfg(test)]
fn test_job() -> CloneJob {
    CloneJob {
        clone_op_id: "7".into(),
        volume_uuid: "a3f2-11".into(),
    }
}

#[test]
fn test_plan_splits_large_spans() {
    let span = BlockSpan {
        src_block: 10,
        dest_block: 20,
        block_count: CALL_BLOCK_LIMIT * 2,
    };
    let plan = plan_block_ranges(span);
    assert_eq!(2, plan.len());
    assert_eq!(32, plan[0].len());
    assert_eq!(32, plan[1].len());
    assert!(plan
        .iter()
        .flatten()
        .all(|r| r.count == BLOCK_COUNT_LIMIT));
    assert_eq!(10 + CALL_BLOCK_LIMIT, plan[1][0].source);
    assert_eq!(20 + CALL_BLOCK_LIMIT, plan[1][0].destination);
}

#[test]
fn test_plan_partial_span() {
    let plan = plan_block_ranges(BlockSpan::blocks(BLOCK_COUNT_LIMIT + 5));
    assert_eq!(1, plan.len());
    assert_eq!(2, plan[0].len());
    assert_eq!(5, plan[0][1].count);
    assert_eq!(BLOCK_COUNT_LIMIT, plan[0][1].source);

    let ranges = block_ranges_element(&plan[0]).unwrap();
    assert_eq!(2, ranges.children().len());
    assert_eq!(
        Some("5"),
        ranges.children()[1].child_content("block-count")
    );
}

#[test]
fn test_plan_whole_lun() {
    let plan = plan_block_ranges(BlockSpan::whole());
    assert_eq!(1, plan.len());
    assert!(plan[0].is_empty());
    assert!(block_ranges_element(&plan[0]).is_none());
}

#[test]
fn test_job_from_start_response() {
    let results = Element::from_xml(
        r#"<results status="passed"><clone-id><clone-id-info>
             <clone-op-id>7</clone-op-id><volume-uuid>a3f2-11</volume-uuid>
           </clone-id-info></clone-id></results>"#,
    )
    .unwrap();
    assert_eq!(Some(test_job()), CloneJob::from_start_response(&results));
    assert_eq!(
        None,
        CloneJob::from_start_response(&Element::new("results"))
    );
}

#[test]
fn test_wait_sleeps_while_running() {
    let transport = ScriptedTransport::new();
    transport.push_xml(&status_xml("running"));
    transport.push_xml(&status_xml("completed"));
    let sleeper = CountingSleeper::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(sleeper.clone());

    poller.wait(&*transport, &test_job()).unwrap();
    assert_eq!(1, sleeper.count());
    assert_eq!(2, transport.invoke_count());
    let request = transport.request(0);
    assert_eq!("clone-list-status", request.name());
    let info = &request.children_of("clone-id")[0];
    assert_eq!(Some("a3f2-11"), info.child_content("volume-uuid"));
    assert!(transport.requests()[0].1);
}

#[test]
fn test_wait_failed_clone() {
    let transport = ScriptedTransport::new();
    transport.push_xml(&status_xml("failed"));
    transport.push_xml(&status_xml("completed"));
    let sleeper = CountingSleeper::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(sleeper.clone());

    match poller.wait(&*transport, &test_job()) {
        Err(StorageError::Clone { code, reason }) => {
            assert_eq!("14575", code);
            assert_eq!("no space", reason);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(0, sleeper.count());
    assert_eq!(1, transport.remaining());
}

#[test]
fn test_wait_times_out() {
    let transport = ScriptedTransport::new();
    for _ in 0..5 {
        transport.push_xml(&status_xml("running"));
    }
    let poll = ClonePollConfig {
        interval: Duration::from_secs(1),
        max_attempts: Some(3),
    };
    let poller = ClonePoller::new(poll).with_sleeper(CountingSleeper::new());
    match poller.wait(&*transport, &test_job()) {
        Err(StorageError::Timeout(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(3, transport.invoke_count());
}

#[test]
fn test_wait_cancelled() {
    let transport = ScriptedTransport::new();
    transport.push_xml(&status_xml("running"));
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(CountingSleeper::new());
    poller.cancel_token().cancel();
    match poller.wait(&*transport, &test_job()) {
        Err(StorageError::Cancelled(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(0, transport.invoke_count());
}

#[test]
fn test_wait_empty_status_keeps_polling() {
    let transport = ScriptedTransport::new();
    transport.push_xml(r#"<results status="passed"/>"#);
    transport.push_xml(&status_xml("completed"));
    let sleeper = CountingSleeper::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(sleeper.clone());
    poller.wait(&*transport, &test_job()).unwrap();
    assert_eq!(1, sleeper.count());
}

#[cfg(test)]
fn multi_status_xml(states: &[&str]) -> String {
    let entries: String = states
        .iter()
        .map(|state| {
            format!(
                "<ops-info><clone-state>{}</clone-state><error>14575</error>\
                 <reason>no space</reason></ops-info>",
                state
            )
        })
        .collect();
    format!(r#"<results status="passed"><status>{}</status></results>"#, entries)
}

#[test]
fn test_wait_checks_every_status_entry() {
    let transport = ScriptedTransport::new();
    transport.push_xml(&multi_status_xml(&["completed", "running"]));
    transport.push_xml(&multi_status_xml(&["completed", "completed"]));
    let sleeper = CountingSleeper::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(sleeper.clone());

    poller.wait(&*transport, &test_job()).unwrap();
    assert_eq!(1, sleeper.count());
    assert_eq!(2, transport.invoke_count());
}

#[test]
fn test_wait_fails_on_any_failed_entry() {
    let transport = ScriptedTransport::new();
    transport.push_xml(&multi_status_xml(&["running", "failed"]));
    let sleeper = CountingSleeper::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(sleeper.clone());

    match poller.wait(&*transport, &test_job()) {
        Err(StorageError::Clone { code, .. }) => assert_eq!("14575", code),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(0, sleeper.count());
}

#[test]
fn test_cancel_token_stays_cancelled_until_reset() {
    let transport = ScriptedTransport::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(CountingSleeper::new());
    let token = poller.cancel_token();
    token.cancel();
    assert!(poller.wait(&*transport, &test_job()).is_err());
    assert!(poller.wait(&*transport, &test_job()).is_err());
    assert_eq!(0, transport.invoke_count());

    token.reset();
    transport.push_xml(&status_xml("completed"));
    poller.wait(&*transport, &test_job()).unwrap();
}
