//! Version chain maintenance
//!
//! Each stored item embeds its predecessor, so a key's history is a singly
//! linked list serialized into `prev`. This module links a new version onto
//! the current one, caps the list at `max_record_length`, and finds the
//! version a snapshot should see.
//!
//! ## Truncation
//!
//! ```text
//! before (max = 2):  v4 -> v3 -> v2 -> v1
//! push v4, v3 on a scratch stack; pop v3, clear its prev, linked_len = 1
//! pop v4, prev = encode(v3), linked_len = 2
//! after:             v4 -> v3
//! ```
//!
//! The re-linking is iterative, so chain depth never turns into recursion
//! depth.

use concord_core::{Codec, DataItem, Error, ProtocolConfig, Result, Timestamp};

/// Link `item` onto `base` and cap the resulting chain
///
/// With a base, `item` embeds it as `prev`, takes `linked_len + 1` and
/// inherits the base's version token (the expected version for the
/// conditional update). Without one, `item` starts a new chain.
pub fn link(mut item: DataItem, base: Option<&DataItem>, config: &ProtocolConfig) -> Result<DataItem> {
    match base {
        Some(base) => {
            item.prev = config.codec.encode(base)?;
            item.linked_len = base.linked_len + 1;
            item.version = base.version.clone();
        }
        None => {
            item.prev.clear();
            item.linked_len = 1;
            item.version.clear();
        }
    }
    truncate(item, config.max_record_length, config.codec)
}

/// Drop the oldest versions until the chain holds at most `max_len` items
///
/// Returns `item` unchanged when it is already within bounds.
pub fn truncate(item: DataItem, max_len: usize, codec: Codec) -> Result<DataItem> {
    if max_len == 0 {
        return Err(Error::InvalidConfig(
            "max_record_length must be at least 1".to_string(),
        ));
    }
    if item.linked_len <= max_len {
        return Ok(item);
    }

    let key = item.key.clone();
    let mut stack: Vec<DataItem> = Vec::with_capacity(max_len);
    let mut next = Some(item);
    while let Some(cur) = next {
        next = if stack.len() + 1 < max_len {
            cur.prev_item(codec)?
        } else {
            None
        };
        stack.push(cur);
    }

    // oldest kept version
    let mut tail = stack.pop().ok_or_else(|| Error::MalformedChain {
        key,
        reason: "empty chain".to_string(),
    })?;
    tail.prev.clear();
    tail.linked_len = 1;
    while let Some(mut next) = stack.pop() {
        next.prev = codec.encode(&tail)?;
        next.linked_len = tail.linked_len + 1;
        tail = next;
    }
    Ok(tail)
}

/// First version in the chain visible to a snapshot at `start`
///
/// Visits at most `max_hops` versions, head included. Returns `None` when no
/// visited version has `t_valid <= start`. Tombstones are returned as found;
/// callers decide what a visible deletion means.
pub fn find_visible(
    head: DataItem,
    start: Timestamp,
    max_hops: usize,
    codec: Codec,
) -> Result<Option<DataItem>> {
    let mut cur = head;
    for hop in 1..=max_hops {
        if cur.visible_at(start) {
            return Ok(Some(cur));
        }
        if hop == max_hops {
            break;
        }
        match cur.prev_item(codec)? {
            Some(prev) => cur = prev,
            None => return Ok(None),
        }
    }
    Ok(None)
}

/// Decode the whole chain, newest first
pub fn versions(head: &DataItem, codec: Codec) -> Result<Vec<DataItem>> {
    let mut out = vec![head.clone()];
    let mut cur = head.prev_item(codec)?;
    while let Some(item) = cur {
        cur = item.prev_item(codec)?;
        out.push(item);
    }
    Ok(out)
}
