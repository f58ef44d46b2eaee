// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted transactions for the consensus gate.
//!
//! The request hash (`consensus:req:{id}`) holds the full request
//! envelope under `data` plus a `status` mirror for cheap filtering.
//! Votes are deduplicated by agent id inside the script, so a reviewer
//! can never count twice no matter how often it retries.

use hive_core::FabricError;
use hive_store::{MemState, StoreScript};
use serde_json::{json, Value};

fn parse_json(raw: &str, what: &str) -> Result<Value, FabricError> {
    serde_json::from_str(raw)
        .map_err(|e| FabricError::Invariant(format!("corrupt {} record: {}", what, e)))
}

fn reply(value: Value) -> Result<Option<String>, FabricError> {
    Ok(Some(value.to_string()))
}

fn contains(list: &Value, agent: &str) -> bool {
    list.as_array()
        .map(|items| items.iter().any(|v| v.as_str() == Some(agent)))
        .unwrap_or(false)
}

fn push(list: &mut Value, agent: &str) {
    if !list.is_array() {
        *list = json!([]);
    }
    if let Some(items) = list.as_array_mut() {
        items.push(json!(agent));
    }
}

/// KEYS: [req_key]
/// ARGV: [data_json, requested_channel, requested_event]
pub static CREATE_REQ: StoreScript = StoreScript {
    name: "gate_create_req",
    lua: r#"
if redis.call('HEXISTS', KEYS[1], 'data') == 1 then
  return cjson.encode({outcome='conflict'})
end
redis.call('HSET', KEYS[1], 'data', ARGV[1], 'status', 'pending')
redis.call('PUBLISH', ARGV[2], ARGV[3])
return cjson.encode({outcome='ok'})
"#,
    mem: create_req_mem,
};

fn create_req_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    if state.hget(&keys[0], "data").is_some() {
        return reply(json!({"outcome": "conflict"}));
    }
    state.hset(&keys[0], "data", &args[0]);
    state.hset(&keys[0], "status", "pending");
    state.publish(&args[1], &args[2]);
    reply(json!({"outcome": "ok"}))
}

/// KEYS: [req_key]
/// ARGV: [agent_id, approve(1|0), reason, now_ms,
///        granted_channel, denied_channel, expired_channel]
pub static VOTE: StoreScript = StoreScript {
    name: "gate_vote",
    lua: r#"
local raw = redis.call('HGET', KEYS[1], 'data')
if not raw then
  return cjson.encode({outcome='notfound'})
end
local req = cjson.decode(raw)
if req.status ~= 'pending' then
  return cjson.encode({outcome='settled', status=req.status})
end
if tonumber(ARGV[4]) > req.deadline_ms then
  req.status = 'expired'
  redis.call('HSET', KEYS[1], 'data', cjson.encode(req), 'status', 'expired')
  redis.call('PUBLISH', ARGV[7], cjson.encode({['type']='consensus:expired', request_id=req.request_id}))
  return cjson.encode({outcome='expired'})
end
if req.initiator == ARGV[1] then
  return cjson.encode({outcome='conflict', detail='initiator cannot vote'})
end
local approvals = req.approvals or {}
local rejections = req.rejections or {}
for _, a in ipairs(approvals) do
  if a == ARGV[1] then
    return cjson.encode({outcome='ok', status=req.status})
  end
end
for _, a in ipairs(rejections) do
  if a == ARGV[1] then
    return cjson.encode({outcome='ok', status=req.status})
  end
end
if ARGV[2] == '1' then
  approvals[#approvals + 1] = ARGV[1]
  req.approvals = approvals
  if #approvals >= req.required_approvals then
    req.status = 'approved'
    redis.call('PUBLISH', ARGV[5], cjson.encode({['type']='consensus:granted', request_id=req.request_id, snapshot_id=req.snapshot_id}))
  end
else
  rejections[#rejections + 1] = ARGV[1]
  req.rejections = rejections
  req.rejection_reason = ARGV[3]
  req.status = 'rejected'
  redis.call('PUBLISH', ARGV[6], cjson.encode({['type']='consensus:denied', request_id=req.request_id, reason=ARGV[3]}))
end
redis.call('HSET', KEYS[1], 'data', cjson.encode(req), 'status', req.status)
return cjson.encode({outcome='ok', status=req.status})
"#,
    mem: vote_mem,
};

fn vote_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(raw) = state.hget(&keys[0], "data") else {
        return reply(json!({"outcome": "notfound"}));
    };
    let mut req = parse_json(&raw, "approval request")?;
    let status = req["status"].as_str().unwrap_or("").to_string();
    if status != "pending" {
        return reply(json!({"outcome": "settled", "status": status}));
    }

    let now: u64 = args[3].parse().unwrap_or(0);
    let deadline = req["deadline_ms"].as_u64().unwrap_or(0);
    if now > deadline {
        req["status"] = json!("expired");
        state.hset(&keys[0], "data", &req.to_string());
        state.hset(&keys[0], "status", "expired");
        state.publish(
            &args[6],
            &json!({"type": "consensus:expired", "request_id": req["request_id"]}).to_string(),
        );
        return reply(json!({"outcome": "expired"}));
    }

    if req["initiator"].as_str() == Some(args[0].as_str()) {
        return reply(json!({"outcome": "conflict", "detail": "initiator cannot vote"}));
    }
    if contains(&req["approvals"], &args[0]) || contains(&req["rejections"], &args[0]) {
        return reply(json!({"outcome": "ok", "status": req["status"]}));
    }

    if args[1] == "1" {
        let mut approvals = req["approvals"].clone();
        push(&mut approvals, &args[0]);
        let count = approvals.as_array().map(|a| a.len()).unwrap_or(0) as u64;
        req["approvals"] = approvals;
        if count >= req["required_approvals"].as_u64().unwrap_or(u64::MAX) {
            req["status"] = json!("approved");
            state.publish(
                &args[4],
                &json!({
                    "type": "consensus:granted",
                    "request_id": req["request_id"],
                    "snapshot_id": req["snapshot_id"],
                })
                .to_string(),
            );
        }
    } else {
        let mut rejections = req["rejections"].clone();
        push(&mut rejections, &args[0]);
        req["rejections"] = rejections;
        req["rejection_reason"] = json!(args[2]);
        req["status"] = json!("rejected");
        state.publish(
            &args[5],
            &json!({
                "type": "consensus:denied",
                "request_id": req["request_id"],
                "reason": args[2],
            })
            .to_string(),
        );
    }

    let status = req["status"].as_str().unwrap_or("pending").to_string();
    state.hset(&keys[0], "data", &req.to_string());
    state.hset(&keys[0], "status", &status);
    reply(json!({"outcome": "ok", "status": status}))
}

/// KEYS: [req_key]
/// ARGV: [now_ms, expired_channel]
pub static EXPIRE_REQ: StoreScript = StoreScript {
    name: "gate_expire_req",
    lua: r#"
local raw = redis.call('HGET', KEYS[1], 'data')
if not raw then
  return cjson.encode({outcome='notfound'})
end
local req = cjson.decode(raw)
if req.status ~= 'pending' then
  return cjson.encode({outcome='settled', status=req.status})
end
if tonumber(ARGV[1]) > req.deadline_ms then
  req.status = 'expired'
  redis.call('HSET', KEYS[1], 'data', cjson.encode(req), 'status', 'expired')
  redis.call('PUBLISH', ARGV[2], cjson.encode({['type']='consensus:expired', request_id=req.request_id}))
  return cjson.encode({outcome='expired'})
end
return cjson.encode({outcome='pending'})
"#,
    mem: expire_req_mem,
};

fn expire_req_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(raw) = state.hget(&keys[0], "data") else {
        return reply(json!({"outcome": "notfound"}));
    };
    let mut req = parse_json(&raw, "approval request")?;
    let status = req["status"].as_str().unwrap_or("").to_string();
    if status != "pending" {
        return reply(json!({"outcome": "settled", "status": status}));
    }
    let now: u64 = args[0].parse().unwrap_or(0);
    if now > req["deadline_ms"].as_u64().unwrap_or(0) {
        req["status"] = json!("expired");
        state.hset(&keys[0], "data", &req.to_string());
        state.hset(&keys[0], "status", "expired");
        state.publish(
            &args[1],
            &json!({"type": "consensus:expired", "request_id": req["request_id"]}).to_string(),
        );
        return reply(json!({"outcome": "expired"}));
    }
    reply(json!({"outcome": "pending"}))
}
