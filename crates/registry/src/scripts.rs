// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted transactions for the registry.
//!
//! Deregistration is a sequence of per-key scripts rather than one giant
//! transaction: remove the entry, force-release each lock, requeue claimed
//! tasks. Each step is atomic and idempotent, so a crash mid-sequence is
//! repaired by the next reaper pass.

use hive_core::task::parse_epoch_ms;
use hive_core::{age_boost, FabricError, Priority};
use hive_store::{MemState, StoreScript};
use serde_json::{json, Value};

fn parse_json(raw: &str, what: &str) -> Result<Value, FabricError> {
    serde_json::from_str(raw)
        .map_err(|e| FabricError::Invariant(format!("corrupt {} record: {}", what, e)))
}

fn reply(value: Value) -> Result<Option<String>, FabricError> {
    Ok(Some(value.to_string()))
}

fn env_eff_score(env: &Value, now_ms: u64) -> f64 {
    let base = env["priority"]
        .as_str()
        .and_then(|p| p.parse::<Priority>().ok())
        .unwrap_or(Priority::Normal)
        .base_score();
    let submitted = env["submitted_at"]
        .as_str()
        .and_then(parse_epoch_ms)
        .unwrap_or(now_ms);
    base * age_boost(now_ms.saturating_sub(submitted))
}

/// KEYS: [agents_registry, agents_heartbeat]
/// ARGV: [agent_id, descriptor_json, now_ms, liveness_ttl_ms, channel, event_json]
///
/// Rejects registration while a live agent already holds the id; a dead or
/// heartbeat-expired entry is silently overwritten.
pub static REGISTER: StoreScript = StoreScript {
    name: "registry_register",
    lua: r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing then
  local desc = cjson.decode(existing)
  local hb = redis.call('HGET', KEYS[2], ARGV[1])
  if desc.status ~= 'dead' and hb then
    local hbrec = cjson.decode(hb)
    if tonumber(ARGV[3]) - hbrec.last_heartbeat_ms <= tonumber(ARGV[4]) then
      return cjson.encode({outcome='busy'})
    end
  end
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[2], ARGV[1], cjson.encode({last_heartbeat_ms=tonumber(ARGV[3]), load=0}))
redis.call('PUBLISH', ARGV[5], ARGV[6])
return cjson.encode({outcome='ok'})
"#,
    mem: register_mem,
};

fn register_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[2].parse().unwrap_or(0);
    let ttl: u64 = args[3].parse().unwrap_or(0);
    if let Some(existing) = state.hget(&keys[0], &args[0]) {
        let desc = parse_json(&existing, "agent")?;
        if desc["status"].as_str() != Some("dead") {
            if let Some(hb) = state.hget(&keys[1], &args[0]) {
                let hbrec = parse_json(&hb, "heartbeat")?;
                let last = hbrec["last_heartbeat_ms"].as_u64().unwrap_or(0);
                if now.saturating_sub(last) <= ttl {
                    return reply(json!({"outcome": "busy"}));
                }
            }
        }
    }
    state.hset(&keys[0], &args[0], &args[1]);
    state.hset(
        &keys[1],
        &args[0],
        &json!({"last_heartbeat_ms": now, "load": 0}).to_string(),
    );
    state.publish(&args[4], &args[5]);
    reply(json!({"outcome": "ok"}))
}

/// KEYS: [agents_registry, agents_heartbeat]
/// ARGV: [agent_id, now_ms, load, status]
pub static HEARTBEAT: StoreScript = StoreScript {
    name: "registry_heartbeat",
    lua: r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return cjson.encode({outcome='notfound'})
end
local desc = cjson.decode(raw)
desc.last_heartbeat_ms = tonumber(ARGV[2])
desc.current_load = tonumber(ARGV[3])
desc.status = ARGV[4]
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(desc))
redis.call('HSET', KEYS[2], ARGV[1], cjson.encode({last_heartbeat_ms=tonumber(ARGV[2]), load=tonumber(ARGV[3])}))
return cjson.encode({outcome='ok'})
"#,
    mem: heartbeat_mem,
};

fn heartbeat_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(raw) = state.hget(&keys[0], &args[0]) else {
        return reply(json!({"outcome": "notfound"}));
    };
    let mut desc = parse_json(&raw, "agent")?;
    let now: u64 = args[1].parse().unwrap_or(0);
    let load: u64 = args[2].parse().unwrap_or(0);
    desc["last_heartbeat_ms"] = json!(now);
    desc["current_load"] = json!(load);
    desc["status"] = json!(args[3]);
    state.hset(&keys[0], &args[0], &desc.to_string());
    state.hset(
        &keys[1],
        &args[0],
        &json!({"last_heartbeat_ms": now, "load": load}).to_string(),
    );
    reply(json!({"outcome": "ok"}))
}

/// KEYS: [agents_registry, agents_heartbeat]
/// ARGV: [agent_id, mode]
///
/// `mode` is `remove` (voluntary deregister) or `mark_dead` (reaper).
/// Returns the descriptor so the caller can clean up locks and claims.
pub static REMOVE_AGENT: StoreScript = StoreScript {
    name: "registry_remove_agent",
    lua: r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return cjson.encode({outcome='notfound'})
end
redis.call('HDEL', KEYS[2], ARGV[1])
if ARGV[2] == 'remove' then
  redis.call('HDEL', KEYS[1], ARGV[1])
else
  local desc = cjson.decode(raw)
  desc.status = 'dead'
  redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(desc))
end
return cjson.encode({outcome='ok', descriptor=cjson.decode(raw)})
"#,
    mem: remove_agent_mem,
};

fn remove_agent_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(raw) = state.hget(&keys[0], &args[0]) else {
        return reply(json!({"outcome": "notfound"}));
    };
    let descriptor = parse_json(&raw, "agent")?;
    state.hdel(&keys[1], &args[0]);
    if args[1] == "remove" {
        state.hdel(&keys[0], &args[0]);
    } else {
        let mut dead = descriptor.clone();
        dead["status"] = json!("dead");
        state.hset(&keys[0], &args[0], &dead.to_string());
    }
    reply(json!({"outcome": "ok", "descriptor": descriptor}))
}

/// KEYS: [tasks, processing, pending]
/// ARGV: [agent_id, now_ms, hint_channel, class]
///
/// Returns every task the agent had claimed straight to `pending` (no
/// backoff: the worker died, the task did not fail).
pub static REQUEUE_AGENT_TASKS: StoreScript = StoreScript {
    name: "registry_requeue_agent_tasks",
    lua: r#"
local function base_score(p)
  if p == 'critical' then return 10.0 end
  if p == 'high' then return 5.0 end
  if p == 'normal' then return 1.0 end
  if p == 'low' then return 0.5 end
  return 0.1
end

local function iso_to_ms(s)
  local y, mo, d, h, mi, sec, ms = string.match(s, '(%d+)-(%d+)-(%d+)T(%d+):(%d+):(%d+)%.(%d+)Z')
  if not y then return 0 end
  y = tonumber(y); mo = tonumber(mo); d = tonumber(d)
  local yy = y
  if mo <= 2 then yy = yy - 1 end
  local era = math.floor(yy / 400)
  local yoe = yy - era * 400
  local mp = mo > 2 and mo - 3 or mo + 9
  local doy = math.floor((153 * mp + 2) / 5) + d - 1
  local doe = yoe * 365 + math.floor(yoe / 4) - math.floor(yoe / 100) + doy
  local days = era * 146097 + doe - 719468
  return ((days * 86400) + tonumber(h) * 3600 + tonumber(mi) * 60 + tonumber(sec)) * 1000 + tonumber(ms)
end

local function eff_score(env, now_ms)
  local age_s = math.max(now_ms - iso_to_ms(env.submitted_at), 0) / 1000.0
  local boost = 1.0 + math.min(age_s / 600.0, 2.0)
  return base_score(env.priority) * boost
end

local entries = redis.call('HGETALL', KEYS[2])
local now = tonumber(ARGV[2])
local count = 0
for i = 1, #entries, 2 do
  local rec = cjson.decode(entries[i + 1])
  if rec.agent_id == ARGV[1] then
    local id = entries[i]
    redis.call('HDEL', KEYS[2], id)
    local raw = redis.call('HGET', KEYS[1], id)
    if raw then
      local env = cjson.decode(raw)
      env.status = 'pending'
      env.claimed_by = nil
      env.claim_deadline = nil
      redis.call('HSET', KEYS[1], id, cjson.encode(env))
      redis.call('ZADD', KEYS[3], eff_score(env, now), id)
      redis.call('PUBLISH', ARGV[3], cjson.encode({['type']='task:enqueued', task_id=id, class=ARGV[4], priority=env.priority}))
      count = count + 1
    end
  end
end
return cjson.encode({outcome='ok', requeued=count})
"#,
    mem: requeue_agent_tasks_mem,
};

fn requeue_agent_tasks_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[1].parse().unwrap_or(0);
    let entries = state.hgetall(&keys[1]);
    let mut count = 0u64;
    for (id, raw_rec) in entries {
        let rec = parse_json(&raw_rec, "claim")?;
        if rec["agent_id"].as_str() != Some(args[0].as_str()) {
            continue;
        }
        state.hdel(&keys[1], &id);
        let Some(raw) = state.hget(&keys[0], &id) else {
            continue;
        };
        let mut env = parse_json(&raw, "task")?;
        env["status"] = json!("pending");
        if let Some(obj) = env.as_object_mut() {
            obj.remove("claimed_by");
            obj.remove("claim_deadline");
        }
        state.hset(&keys[0], &id, &env.to_string());
        state.zadd(&keys[2], &id, env_eff_score(&env, now));
        state.publish(
            &args[2],
            &json!({
                "type": "task:enqueued",
                "task_id": id,
                "class": args[3],
                "priority": env["priority"],
            })
            .to_string(),
        );
        count += 1;
    }
    reply(json!({"outcome": "ok", "requeued": count}))
}

/// KEYS: [file_lock_hash]
/// ARGV: [agent_id]
///
/// Unconditional removal of one agent from a lock, fence checks skipped;
/// only deregistration and reaping use this.
pub static FORCE_RELEASE_FILE: StoreScript = StoreScript {
    name: "registry_force_release_file",
    lua: r#"
local changed = 0
if redis.call('HGET', KEYS[1], 'writer') == ARGV[1] then
  redis.call('HDEL', KEYS[1], 'writer', 'writer_expires_ms', 'writer_fence')
  changed = 1
end
local raw = redis.call('HGET', KEYS[1], 'readers')
if raw then
  local readers = cjson.decode(raw)
  if readers[ARGV[1]] then
    readers[ARGV[1]] = nil
    changed = 1
    if next(readers) == nil then
      redis.call('HDEL', KEYS[1], 'readers')
    else
      redis.call('HSET', KEYS[1], 'readers', cjson.encode(readers))
    end
  end
end
return cjson.encode({outcome='ok', changed=changed})
"#,
    mem: force_release_file_mem,
};

fn force_release_file_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let mut changed = 0u64;
    if state.hget(&keys[0], "writer").as_deref() == Some(args[0].as_str()) {
        state.hdel(&keys[0], "writer");
        state.hdel(&keys[0], "writer_expires_ms");
        state.hdel(&keys[0], "writer_fence");
        changed = 1;
    }
    if let Some(raw) = state.hget(&keys[0], "readers") {
        let mut readers = parse_json(&raw, "readers")?;
        if let Some(map) = readers.as_object_mut() {
            if map.remove(&args[0]).is_some() {
                changed = 1;
                if map.is_empty() {
                    state.hdel(&keys[0], "readers");
                } else {
                    state.hset(&keys[0], "readers", &readers.to_string());
                }
            }
        }
    }
    reply(json!({"outcome": "ok", "changed": changed}))
}

/// KEYS: [port_lock]
/// ARGV: [agent_id]
pub static FORCE_RELEASE_PORT: StoreScript = StoreScript {
    name: "registry_force_release_port",
    lua: r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return cjson.encode({outcome='ok', released=1})
end
return cjson.encode({outcome='ok', released=0})
"#,
    mem: force_release_port_mem,
};

fn force_release_port_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    if state.get(&keys[0]).as_deref() == Some(args[0].as_str()) {
        state.del(&keys[0]);
        return reply(json!({"outcome": "ok", "released": 1}));
    }
    reply(json!({"outcome": "ok", "released": 0}))
}
