// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted transactions for the queue engine.
//!
//! Each script's Lua and native halves must stay semantically identical;
//! the native half is what the test suite exercises. Key and arg layouts
//! are documented per script. All scripts return a JSON object with an
//! `outcome` field which [`engine`](crate::engine) maps onto the error
//! taxonomy.
//!
//! Timestamps inside envelopes are fixed-precision ISO-8601 strings
//! (`...SS.mmmZ`), so the Lua side can compare them lexicographically and
//! convert with plain calendar arithmetic (no `os.date` in Redis Lua).

use hive_core::task::{format_epoch_ms, parse_epoch_ms};
use hive_core::{age_boost, FabricError, Priority};
use hive_store::{MemState, StoreScript};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// native helpers
// ---------------------------------------------------------------------------

fn parse_json(raw: &str, what: &str) -> Result<Value, FabricError> {
    serde_json::from_str(raw)
        .map_err(|e| FabricError::Invariant(format!("corrupt {} record: {}", what, e)))
}

fn reply(value: Value) -> Result<Option<String>, FabricError> {
    Ok(Some(value.to_string()))
}

fn env_priority(env: &Value) -> Priority {
    env["priority"]
        .as_str()
        .and_then(|p| p.parse().ok())
        .unwrap_or(Priority::Normal)
}

/// Effective priority of an envelope as of `now_ms`.
pub(crate) fn env_eff_score(env: &Value, now_ms: u64) -> f64 {
    let submitted = env["submitted_at"]
        .as_str()
        .and_then(parse_epoch_ms)
        .unwrap_or(now_ms);
    env_priority(env).base_score() * age_boost(now_ms.saturating_sub(submitted))
}

fn enqueued_hint(task_id: &str, class: &str, env: &Value) -> String {
    json!({
        "type": "task:enqueued",
        "task_id": task_id,
        "class": class,
        "priority": env["priority"],
    })
    .to_string()
}

fn clear_claim_fields(env: &mut Value, status: &str) {
    env["status"] = json!(status);
    if let Some(obj) = env.as_object_mut() {
        obj.remove("claimed_by");
        obj.remove("claim_deadline");
    }
}

// ---------------------------------------------------------------------------
// enqueue
// ---------------------------------------------------------------------------

/// KEYS: [tasks, pending, held, queue_state]
/// ARGV: [task_id, envelope_json, score, hint_channel, hint_json]
pub static ENQUEUE: StoreScript = StoreScript {
    name: "engine_enqueue",
    lua: r#"
local paused = redis.call('HGET', KEYS[4], 'paused')
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
if paused == '1' then
  redis.call('RPUSH', KEYS[3], ARGV[1])
  return cjson.encode({outcome='held'})
end
redis.call('ZADD', KEYS[2], tonumber(ARGV[3]), ARGV[1])
redis.call('PUBLISH', ARGV[4], ARGV[5])
return cjson.encode({outcome='queued'})
"#,
    mem: enqueue_mem,
};

fn enqueue_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let paused = state.hget(&keys[3], "paused").as_deref() == Some("1");
    state.hset(&keys[0], &args[0], &args[1]);
    if paused {
        state.rpush(&keys[2], &args[0]);
        return reply(json!({"outcome": "held"}));
    }
    let score: f64 = args[2].parse().unwrap_or(0.0);
    state.zadd(&keys[1], &args[0], score);
    state.publish(&args[3], &args[4]);
    reply(json!({"outcome": "queued"}))
}

// ---------------------------------------------------------------------------
// claim
// ---------------------------------------------------------------------------

/// KEYS: [tasks, pending, processing, queue_state, emergency_stop]
/// ARGV: [agent_id, now_ms, window]
///
/// Picks the highest stored score; ties broken by earliest `submitted_at`
/// (lexicographic on the fixed-width timestamps), then smallest task id.
pub static CLAIM: StoreScript = StoreScript {
    name: "engine_claim",
    lua: r#"
local function ms_to_iso(ms)
  local s = math.floor(ms / 1000)
  local msec = ms % 1000
  local days = math.floor(s / 86400)
  local rem = s % 86400
  local z = days + 719468
  local era = math.floor(z / 146097)
  local doe = z - era * 146097
  local yoe = math.floor((doe - math.floor(doe/1460) + math.floor(doe/36524) - math.floor(doe/146096)) / 365)
  local y = yoe + era * 400
  local doy = doe - (365*yoe + math.floor(yoe/4) - math.floor(yoe/100))
  local mp = math.floor((5*doy + 2)/153)
  local d = doy - math.floor((153*mp+2)/5) + 1
  local m = mp < 10 and mp + 3 or mp - 9
  if m <= 2 then y = y + 1 end
  local hh = math.floor(rem / 3600)
  local mi = math.floor((rem % 3600) / 60)
  local ss = rem % 60
  return string.format('%04d-%02d-%02dT%02d:%02d:%02d.%03dZ', y, m, d, hh, mi, ss, msec)
end

if redis.call('EXISTS', KEYS[5]) == 1 then
  return cjson.encode({outcome='paused', scope='emergency'})
end
if redis.call('HGET', KEYS[4], 'paused') == '1' then
  return cjson.encode({outcome='paused', scope='class'})
end
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local cands = redis.call('ZREVRANGE', KEYS[2], 0, window - 1, 'WITHSCORES')
if #cands == 0 then
  return cjson.encode({outcome='empty'})
end
local top = tonumber(cands[2])
local best_id, best_env, best_sub = nil, nil, nil
for i = 1, #cands, 2 do
  if tonumber(cands[i + 1]) < top then break end
  local raw = redis.call('HGET', KEYS[1], cands[i])
  if raw then
    local env = cjson.decode(raw)
    local sub = env.submitted_at
    if best_id == nil or sub < best_sub or (sub == best_sub and cands[i] < best_id) then
      best_id, best_env, best_sub = cands[i], env, sub
    end
  else
    redis.call('ZREM', KEYS[2], cands[i])
  end
end
if best_id == nil then
  return cjson.encode({outcome='empty'})
end
redis.call('ZREM', KEYS[2], best_id)
best_env.attempt = best_env.attempt + 1
best_env.status = 'processing'
best_env.claimed_by = ARGV[1]
local deadline = now + best_env.timeout_ms
best_env.claim_deadline = ms_to_iso(deadline)
redis.call('HSET', KEYS[1], best_id, cjson.encode(best_env))
redis.call('HSET', KEYS[3], best_id, cjson.encode({agent_id=ARGV[1], claim_deadline_ms=deadline, attempt=best_env.attempt}))
return cjson.encode({outcome='claimed', task=best_env})
"#,
    mem: claim_mem,
};

fn claim_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    if state.get(&keys[4]).is_some() {
        return reply(json!({"outcome": "paused", "scope": "emergency"}));
    }
    if state.hget(&keys[3], "paused").as_deref() == Some("1") {
        return reply(json!({"outcome": "paused", "scope": "class"}));
    }
    let now: u64 = args[1].parse().unwrap_or(0);
    let window: isize = args[2].parse().unwrap_or(8);
    let cands = state.zrevrange(&keys[1], 0, window - 1);
    if cands.is_empty() {
        return reply(json!({"outcome": "empty"}));
    }

    let top = cands[0].1;
    let mut best: Option<(String, Value, String)> = None;
    for (id, score) in &cands {
        if *score < top {
            break;
        }
        let Some(raw) = state.hget(&keys[0], id) else {
            state.zrem(&keys[1], id);
            continue;
        };
        let env = parse_json(&raw, "task")?;
        let sub = env["submitted_at"].as_str().unwrap_or("").to_string();
        let better = match &best {
            None => true,
            Some((best_id, _, best_sub)) => {
                sub < *best_sub || (sub == *best_sub && id < best_id)
            }
        };
        if better {
            best = Some((id.clone(), env, sub));
        }
    }

    let Some((task_id, mut env, _)) = best else {
        return reply(json!({"outcome": "empty"}));
    };
    state.zrem(&keys[1], &task_id);

    let attempt = env["attempt"].as_u64().unwrap_or(0) + 1;
    let timeout_ms = env["timeout_ms"].as_u64().unwrap_or(0);
    let deadline = now + timeout_ms;
    env["attempt"] = json!(attempt);
    env["status"] = json!("processing");
    env["claimed_by"] = json!(args[0]);
    env["claim_deadline"] = json!(format_epoch_ms(deadline));

    state.hset(&keys[0], &task_id, &env.to_string());
    state.hset(
        &keys[2],
        &task_id,
        &json!({"agent_id": args[0], "claim_deadline_ms": deadline, "attempt": attempt}).to_string(),
    );
    reply(json!({"outcome": "claimed", "task": env}))
}

// ---------------------------------------------------------------------------
// complete
// ---------------------------------------------------------------------------

/// KEYS: [tasks, processing]
/// ARGV: [task_id, agent_id, completed_channel, result_json_or_empty, class]
pub static COMPLETE: StoreScript = StoreScript {
    name: "engine_complete",
    lua: r#"
local rec = redis.call('HGET', KEYS[2], ARGV[1])
if not rec then
  if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    return cjson.encode({outcome='conflict', detail='not processing'})
  end
  return cjson.encode({outcome='notfound'})
end
local claim = cjson.decode(rec)
if claim.agent_id ~= ARGV[2] then
  return cjson.encode({outcome='conflict', detail='reassigned'})
end
local env = cjson.decode(redis.call('HGET', KEYS[1], ARGV[1]))
redis.call('HDEL', KEYS[2], ARGV[1])
env.status = 'completed'
env.claimed_by = nil
env.claim_deadline = nil
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(env))
local event = {['type']='task:completed', task_id=ARGV[1], class=ARGV[5], agent_id=ARGV[2]}
if ARGV[4] ~= '' then
  event.result = cjson.decode(ARGV[4])
end
redis.call('PUBLISH', ARGV[3], cjson.encode(event))
return cjson.encode({outcome='ok'})
"#,
    mem: complete_mem,
};

fn complete_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(rec) = state.hget(&keys[1], &args[0]) else {
        if state.hget(&keys[0], &args[0]).is_some() {
            return reply(json!({"outcome": "conflict", "detail": "not processing"}));
        }
        return reply(json!({"outcome": "notfound"}));
    };
    let claim = parse_json(&rec, "claim")?;
    if claim["agent_id"].as_str() != Some(args[1].as_str()) {
        return reply(json!({"outcome": "conflict", "detail": "reassigned"}));
    }
    let raw = state
        .hget(&keys[0], &args[0])
        .ok_or_else(|| FabricError::Invariant(format!("processing entry without task {}", args[0])))?;
    let mut env = parse_json(&raw, "task")?;
    state.hdel(&keys[1], &args[0]);
    clear_claim_fields(&mut env, "completed");
    state.hset(&keys[0], &args[0], &env.to_string());

    let mut event = json!({
        "type": "task:completed",
        "task_id": args[0],
        "class": args[4],
        "agent_id": args[1],
    });
    if !args[3].is_empty() {
        event["result"] = parse_json(&args[3], "result")?;
    }
    state.publish(&args[2], &event.to_string());
    reply(json!({"outcome": "ok"}))
}

// ---------------------------------------------------------------------------
// fail
// ---------------------------------------------------------------------------

/// KEYS: [tasks, processing, delayed, dead]
/// ARGV: [task_id, agent_id_or_empty, expected_attempt_or_empty, error,
///        retryable, now_ms, delay_ms, dead_channel, class]
///
/// Empty `agent_id` skips the ownership check (lease reaper); the expected
/// attempt guards the reaper against failing a lease that was already
/// reclaimed by someone else.
pub static FAIL: StoreScript = StoreScript {
    name: "engine_fail",
    lua: r#"
local rec = redis.call('HGET', KEYS[2], ARGV[1])
if not rec then
  if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    return cjson.encode({outcome='conflict', detail='not processing'})
  end
  return cjson.encode({outcome='notfound'})
end
local claim = cjson.decode(rec)
if ARGV[2] ~= '' and claim.agent_id ~= ARGV[2] then
  return cjson.encode({outcome='conflict', detail='reassigned'})
end
if ARGV[3] ~= '' and tostring(claim.attempt) ~= ARGV[3] then
  return cjson.encode({outcome='conflict', detail='attempt changed'})
end
local env = cjson.decode(redis.call('HGET', KEYS[1], ARGV[1]))
redis.call('HDEL', KEYS[2], ARGV[1])
env.claimed_by = nil
env.claim_deadline = nil
if ARGV[5] == '1' and env.attempt < env.max_retries + 1 then
  env.status = 'pending'
  redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(env))
  local ready = tonumber(ARGV[6]) + tonumber(ARGV[7])
  redis.call('ZADD', KEYS[3], ready, ARGV[1])
  return cjson.encode({outcome='retry', ready_at_ms=ready, attempt=env.attempt})
end
env.status = 'dead'
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(env))
redis.call('RPUSH', KEYS[4], ARGV[1])
redis.call('PUBLISH', ARGV[8], cjson.encode({['type']='task:dead', task_id=ARGV[1], class=ARGV[9], error=ARGV[4], attempt=env.attempt}))
return cjson.encode({outcome='dead', attempt=env.attempt})
"#,
    mem: fail_mem,
};

fn fail_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(rec) = state.hget(&keys[1], &args[0]) else {
        if state.hget(&keys[0], &args[0]).is_some() {
            return reply(json!({"outcome": "conflict", "detail": "not processing"}));
        }
        return reply(json!({"outcome": "notfound"}));
    };
    let claim = parse_json(&rec, "claim")?;
    if !args[1].is_empty() && claim["agent_id"].as_str() != Some(args[1].as_str()) {
        return reply(json!({"outcome": "conflict", "detail": "reassigned"}));
    }
    if !args[2].is_empty() && claim["attempt"].as_u64().map(|a| a.to_string()) != Some(args[2].clone())
    {
        return reply(json!({"outcome": "conflict", "detail": "attempt changed"}));
    }

    let raw = state
        .hget(&keys[0], &args[0])
        .ok_or_else(|| FabricError::Invariant(format!("processing entry without task {}", args[0])))?;
    let mut env = parse_json(&raw, "task")?;
    state.hdel(&keys[1], &args[0]);

    let attempt = env["attempt"].as_u64().unwrap_or(0);
    let max_retries = env["max_retries"].as_u64().unwrap_or(0);
    let retryable = args[4] == "1";

    if retryable && attempt < max_retries + 1 {
        clear_claim_fields(&mut env, "pending");
        state.hset(&keys[0], &args[0], &env.to_string());
        let now: u64 = args[5].parse().unwrap_or(0);
        let delay: u64 = args[6].parse().unwrap_or(0);
        let ready = now + delay;
        state.zadd(&keys[2], &args[0], ready as f64);
        return reply(json!({"outcome": "retry", "ready_at_ms": ready, "attempt": attempt}));
    }

    clear_claim_fields(&mut env, "dead");
    state.hset(&keys[0], &args[0], &env.to_string());
    state.rpush(&keys[3], &args[0]);
    state.publish(
        &args[7],
        &json!({
            "type": "task:dead",
            "task_id": args[0],
            "class": args[8],
            "error": args[3],
            "attempt": attempt,
        })
        .to_string(),
    );
    reply(json!({"outcome": "dead", "attempt": attempt}))
}

// ---------------------------------------------------------------------------
// promote (delayed -> pending)
// ---------------------------------------------------------------------------

/// KEYS: [tasks, delayed, pending, held, queue_state]
/// ARGV: [now_ms, limit, hint_channel, class]
pub static PROMOTE: StoreScript = StoreScript {
    name: "engine_promote",
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

local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now, 'LIMIT', 0, tonumber(ARGV[2]))
local paused = redis.call('HGET', KEYS[5], 'paused') == '1'
local count = 0
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  local raw = redis.call('HGET', KEYS[1], id)
  if raw then
    if paused then
      redis.call('RPUSH', KEYS[4], id)
    else
      local env = cjson.decode(raw)
      redis.call('ZADD', KEYS[3], eff_score(env, now), id)
      redis.call('PUBLISH', ARGV[3], cjson.encode({['type']='task:enqueued', task_id=id, class=ARGV[4], priority=env.priority}))
    end
    count = count + 1
  end
end
return cjson.encode({outcome='ok', promoted=count})
"#,
    mem: promote_mem,
};

fn promote_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[0].parse().unwrap_or(0);
    let limit: usize = args[1].parse().unwrap_or(100);
    let due = state.zrange_by_score(&keys[1], f64::MIN, now as f64, limit);
    let paused = state.hget(&keys[4], "paused").as_deref() == Some("1");
    let mut count = 0u64;

    for (id, _) in due {
        state.zrem(&keys[1], &id);
        let Some(raw) = state.hget(&keys[0], &id) else {
            continue;
        };
        if paused {
            state.rpush(&keys[3], &id);
        } else {
            let env = parse_json(&raw, "task")?;
            state.zadd(&keys[2], &id, env_eff_score(&env, now));
            state.publish(&args[2], &enqueued_hint(&id, &args[3], &env));
        }
        count += 1;
    }
    reply(json!({"outcome": "ok", "promoted": count}))
}

// ---------------------------------------------------------------------------
// rescore (age boost refresh)
// ---------------------------------------------------------------------------

/// KEYS: [tasks, pending]
/// ARGV: [now_ms, limit]
pub static RESCORE: StoreScript = StoreScript {
    name: "engine_rescore",
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

local now = tonumber(ARGV[1])
local members = redis.call('ZRANGE', KEYS[2], 0, tonumber(ARGV[2]) - 1, 'WITHSCORES')
local count = 0
for i = 1, #members, 2 do
  local raw = redis.call('HGET', KEYS[1], members[i])
  if raw then
    local score = eff_score(cjson.decode(raw), now)
    if score ~= tonumber(members[i + 1]) then
      redis.call('ZADD', KEYS[2], score, members[i])
      count = count + 1
    end
  end
end
return cjson.encode({outcome='ok', rescored=count})
"#,
    mem: rescore_mem,
};

fn rescore_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[0].parse().unwrap_or(0);
    let limit: usize = args[1].parse().unwrap_or(512);
    let members = state.zrange_by_score(&keys[1], f64::MIN, f64::MAX, limit);
    let mut count = 0u64;
    for (id, old_score) in members {
        let Some(raw) = state.hget(&keys[0], &id) else {
            continue;
        };
        let env = parse_json(&raw, "task")?;
        let score = env_eff_score(&env, now);
        if score != old_score {
            state.zadd(&keys[1], &id, score);
            count += 1;
        }
    }
    reply(json!({"outcome": "ok", "rescored": count}))
}

// ---------------------------------------------------------------------------
// pause / resume
// ---------------------------------------------------------------------------

/// KEYS: [queue_state]
/// ARGV: [now_ms, reason, channel, event_json]
pub static PAUSE: StoreScript = StoreScript {
    name: "engine_pause",
    lua: r#"
redis.call('HSET', KEYS[1], 'paused', '1', 'paused_at', ARGV[1], 'reason', ARGV[2])
redis.call('PUBLISH', ARGV[3], ARGV[4])
return cjson.encode({outcome='ok'})
"#,
    mem: pause_mem,
};

fn pause_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    state.hset(&keys[0], "paused", "1");
    state.hset(&keys[0], "paused_at", &args[0]);
    state.hset(&keys[0], "reason", &args[1]);
    state.publish(&args[2], &args[3]);
    reply(json!({"outcome": "ok"}))
}

/// KEYS: [queue_state, held, pending, tasks]
/// ARGV: [now_ms, coordination_channel, event_json, hint_channel, class]
pub static RESUME: StoreScript = StoreScript {
    name: "engine_resume",
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

redis.call('HSET', KEYS[1], 'paused', '0')
redis.call('HDEL', KEYS[1], 'reason', 'paused_at')
local now = tonumber(ARGV[1])
local count = 0
while true do
  local id = redis.call('LPOP', KEYS[2])
  if not id then break end
  local raw = redis.call('HGET', KEYS[4], id)
  if raw then
    local env = cjson.decode(raw)
    if env.status == 'pending' then
      redis.call('ZADD', KEYS[3], eff_score(env, now), id)
      redis.call('PUBLISH', ARGV[4], cjson.encode({['type']='task:enqueued', task_id=id, class=ARGV[5], priority=env.priority}))
      count = count + 1
    end
  end
end
redis.call('PUBLISH', ARGV[2], ARGV[3])
return cjson.encode({outcome='ok', drained=count})
"#,
    mem: resume_mem,
};

fn resume_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    state.hset(&keys[0], "paused", "0");
    state.hdel(&keys[0], "reason");
    state.hdel(&keys[0], "paused_at");
    let now: u64 = args[0].parse().unwrap_or(0);
    let mut count = 0u64;
    while let Some(id) = state.lpop(&keys[1]) {
        let Some(raw) = state.hget(&keys[3], &id) else {
            continue;
        };
        let env = parse_json(&raw, "task")?;
        if env["status"].as_str() == Some("pending") {
            state.zadd(&keys[2], &id, env_eff_score(&env, now));
            state.publish(&args[3], &enqueued_hint(&id, &args[4], &env));
            count += 1;
        }
    }
    state.publish(&args[1], &args[2]);
    reply(json!({"outcome": "ok", "drained": count}))
}

// ---------------------------------------------------------------------------
// reprioritize
// ---------------------------------------------------------------------------

/// KEYS: [tasks, pending]
/// ARGV: [task_id, new_priority, reason, now_ms, coordination_channel, class]
pub static REPRIORITIZE: StoreScript = StoreScript {
    name: "engine_reprioritize",
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

local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return cjson.encode({outcome='notfound'})
end
local env = cjson.decode(raw)
if env.status ~= 'pending' and env.status ~= 'processing' then
  return cjson.encode({outcome='conflict', detail=env.status})
end
local old = env.priority
env.priority = ARGV[2]
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(env))
if redis.call('ZSCORE', KEYS[2], ARGV[1]) then
  redis.call('ZADD', KEYS[2], eff_score(env, tonumber(ARGV[4])), ARGV[1])
end
redis.call('PUBLISH', ARGV[5], cjson.encode({['type']='task:reprioritized', task_id=ARGV[1], class=ARGV[6], old_priority=old, new_priority=ARGV[2], reason=ARGV[3]}))
return cjson.encode({outcome='ok', old_priority=old})
"#,
    mem: reprioritize_mem,
};

fn reprioritize_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(raw) = state.hget(&keys[0], &args[0]) else {
        return reply(json!({"outcome": "notfound"}));
    };
    let mut env = parse_json(&raw, "task")?;
    let status = env["status"].as_str().unwrap_or("");
    if status != "pending" && status != "processing" {
        return reply(json!({"outcome": "conflict", "detail": status}));
    }
    let old = env["priority"].clone();
    env["priority"] = json!(args[1]);
    state.hset(&keys[0], &args[0], &env.to_string());
    if state.zscore(&keys[1], &args[0]).is_some() {
        let now: u64 = args[3].parse().unwrap_or(0);
        state.zadd(&keys[1], &args[0], env_eff_score(&env, now));
    }
    state.publish(
        &args[4],
        &json!({
            "type": "task:reprioritized",
            "task_id": args[0],
            "class": args[5],
            "old_priority": old,
            "new_priority": args[1],
            "reason": args[2],
        })
        .to_string(),
    );
    reply(json!({"outcome": "ok", "old_priority": old}))
}

// ---------------------------------------------------------------------------
// add_context
// ---------------------------------------------------------------------------

/// KEYS: [tasks]
/// ARGV: [task_id, context_json_or_empty, prompt_suffix_or_empty]
pub static ADD_CONTEXT: StoreScript = StoreScript {
    name: "engine_add_context",
    lua: r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return cjson.encode({outcome='notfound'})
end
local env = cjson.decode(raw)
if env.status ~= 'pending' and env.status ~= 'processing' then
  return cjson.encode({outcome='conflict', detail=env.status})
end
if ARGV[2] ~= '' then
  local ctx = cjson.decode(ARGV[2])
  if type(env.payload) ~= 'table' then
    env.payload = {}
  end
  for k, v in pairs(ctx) do
    env.payload[k] = v
  end
end
if ARGV[3] ~= '' then
  env.prompt_suffix = (env.prompt_suffix or '') .. ARGV[3]
end
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(env))
return cjson.encode({outcome='ok'})
"#,
    mem: add_context_mem,
};

fn add_context_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let Some(raw) = state.hget(&keys[0], &args[0]) else {
        return reply(json!({"outcome": "notfound"}));
    };
    let mut env = parse_json(&raw, "task")?;
    let status = env["status"].as_str().unwrap_or("");
    if status != "pending" && status != "processing" {
        return reply(json!({"outcome": "conflict", "detail": status}));
    }
    if !args[1].is_empty() {
        let ctx = parse_json(&args[1], "context")?;
        if !env["payload"].is_object() {
            env["payload"] = json!({});
        }
        if let (Some(payload), Some(ctx)) = (env["payload"].as_object_mut(), ctx.as_object()) {
            for (k, v) in ctx {
                payload.insert(k.clone(), v.clone());
            }
        }
    }
    if !args[2].is_empty() {
        let existing = env["prompt_suffix"].as_str().unwrap_or("").to_string();
        env["prompt_suffix"] = json!(format!("{}{}", existing, args[2]));
    }
    state.hset(&keys[0], &args[0], &env.to_string());
    reply(json!({"outcome": "ok"}))
}

// ---------------------------------------------------------------------------
// requeue_failed (dead -> pending)
// ---------------------------------------------------------------------------

/// KEYS: [tasks, dead, pending]
/// ARGV: [now_ms, hint_channel, class]
pub static REQUEUE_FAILED: StoreScript = StoreScript {
    name: "engine_requeue_failed",
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

local now = tonumber(ARGV[1])
local count = 0
while true do
  local id = redis.call('LPOP', KEYS[2])
  if not id then break end
  local raw = redis.call('HGET', KEYS[1], id)
  if raw then
    local env = cjson.decode(raw)
    env.status = 'pending'
    env.attempt = 0
    env.claimed_by = nil
    env.claim_deadline = nil
    redis.call('HSET', KEYS[1], id, cjson.encode(env))
    redis.call('ZADD', KEYS[3], eff_score(env, now), id)
    redis.call('PUBLISH', ARGV[2], cjson.encode({['type']='task:enqueued', task_id=id, class=ARGV[3], priority=env.priority}))
    count = count + 1
  end
end
return cjson.encode({outcome='ok', requeued=count})
"#,
    mem: requeue_failed_mem,
};

fn requeue_failed_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[0].parse().unwrap_or(0);
    let mut count = 0u64;
    while let Some(id) = state.lpop(&keys[1]) {
        let Some(raw) = state.hget(&keys[0], &id) else {
            continue;
        };
        let mut env = parse_json(&raw, "task")?;
        clear_claim_fields(&mut env, "pending");
        env["attempt"] = json!(0);
        state.hset(&keys[0], &id, &env.to_string());
        state.zadd(&keys[2], &id, env_eff_score(&env, now));
        state.publish(&args[1], &enqueued_hint(&id, &args[2], &env));
        count += 1;
    }
    reply(json!({"outcome": "ok", "requeued": count}))
}
