// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted transactions for locks.
//!
//! The lock hash (`locks:file:{sha256(path)}`) holds:
//! - `writer`, `writer_expires_ms`, `writer_fence` - the exclusive holder
//! - `readers` - JSON map of `agent_id -> {expires_ms, fence}`
//! - `fence` - monotonic grant counter, bumped on every grant
//!
//! Redis cannot TTL individual hash fields, so every script sweeps expired
//! holders before making its decision; an expired lock is indistinguishable
//! from a released one.
//!
//! Acquire/release also maintain `held_locks`/`reserved_ports` on the
//! agent's registry descriptor (when the agent is registered), which is
//! what lets deregistration release exactly the right resources.

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

/// Drop expired writer/readers in the native half.
fn sweep_mem(state: &mut MemState, lock_key: &str, now_ms: u64) -> Result<(), FabricError> {
    if state.hget(lock_key, "writer").is_some() {
        let expired = state
            .hget(lock_key, "writer_expires_ms")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|t| t <= now_ms)
            .unwrap_or(true);
        if expired {
            state.hdel(lock_key, "writer");
            state.hdel(lock_key, "writer_expires_ms");
            state.hdel(lock_key, "writer_fence");
        }
    }
    if let Some(raw) = state.hget(lock_key, "readers") {
        let mut readers = parse_json(&raw, "readers")?;
        if let Some(map) = readers.as_object_mut() {
            map.retain(|_, entry| {
                entry["expires_ms"].as_u64().map(|t| t > now_ms).unwrap_or(false)
            });
            if map.is_empty() {
                state.hdel(lock_key, "readers");
            } else {
                state.hset(lock_key, "readers", &readers.to_string());
            }
        }
    }
    Ok(())
}

/// Add or remove a lock digest on the agent's registry descriptor.
fn update_descriptor_mem(
    state: &mut MemState,
    registry_key: &str,
    agent_id: &str,
    field: &str,
    value: &Value,
    add: bool,
) -> Result<(), FabricError> {
    let Some(raw) = state.hget(registry_key, agent_id) else {
        return Ok(());
    };
    let mut desc = parse_json(&raw, "agent")?;
    if !desc[field].is_array() {
        desc[field] = json!([]);
    }
    if let Some(items) = desc[field].as_array_mut() {
        if add {
            if !items.contains(value) {
                items.push(value.clone());
            }
        } else {
            items.retain(|v| v != value);
        }
    }
    state.hset(registry_key, agent_id, &desc.to_string());
    Ok(())
}

// The sweep/update_descriptor helpers are repeated at the top of each Lua
// source below; EVAL has no include mechanism.

/// KEYS: [lock_hash, agents_registry]
/// ARGV: [agent_id, mode(read|write), ttl_ms, now_ms, digest]
pub static ACQUIRE_FILE: StoreScript = StoreScript {
    name: "coordinator_acquire_file",
    lua: r#"
local function sweep(lock_key, now)
  local wexp = tonumber(redis.call('HGET', lock_key, 'writer_expires_ms') or '0')
  if redis.call('HEXISTS', lock_key, 'writer') == 1 and wexp <= now then
    redis.call('HDEL', lock_key, 'writer', 'writer_expires_ms', 'writer_fence')
  end
  local raw = redis.call('HGET', lock_key, 'readers')
  if raw then
    local readers = cjson.decode(raw)
    local changed = false
    for agent, entry in pairs(readers) do
      if tonumber(entry.expires_ms) <= now then
        readers[agent] = nil
        changed = true
      end
    end
    if changed then
      if next(readers) == nil then
        redis.call('HDEL', lock_key, 'readers')
      else
        redis.call('HSET', lock_key, 'readers', cjson.encode(readers))
      end
    end
  end
end

local function update_descriptor(registry_key, agent_id, field, value, add)
  local raw = redis.call('HGET', registry_key, agent_id)
  if not raw then return end
  local desc = cjson.decode(raw)
  local items = desc[field]
  if type(items) ~= 'table' then items = {} end
  local out = {}
  local present = false
  for _, v in ipairs(items) do
    if v == value then
      present = true
      if add then out[#out + 1] = v end
    else
      out[#out + 1] = v
    end
  end
  if add and not present then out[#out + 1] = value end
  desc[field] = out
  redis.call('HSET', registry_key, agent_id, cjson.encode(desc))
end

local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[3])
sweep(KEYS[1], now)
local writer = redis.call('HGET', KEYS[1], 'writer')
local raw = redis.call('HGET', KEYS[1], 'readers')
local readers = raw and cjson.decode(raw) or {}

if ARGV[2] == 'write' then
  if writer and writer ~= ARGV[1] then
    return cjson.encode({outcome='busy', holder=writer})
  end
  if next(readers) ~= nil then
    return cjson.encode({outcome='busy', holder='readers'})
  end
  if writer == ARGV[1] then
    redis.call('HSET', KEYS[1], 'writer_expires_ms', tostring(now + ttl))
    local fence = tonumber(redis.call('HGET', KEYS[1], 'writer_fence'))
    return cjson.encode({outcome='ok', fence=fence, expires_ms=now + ttl})
  end
  local fence = redis.call('HINCRBY', KEYS[1], 'fence', 1)
  redis.call('HSET', KEYS[1], 'writer', ARGV[1], 'writer_expires_ms', tostring(now + ttl), 'writer_fence', tostring(fence))
  update_descriptor(KEYS[2], ARGV[1], 'held_locks', ARGV[5], true)
  return cjson.encode({outcome='ok', fence=fence, expires_ms=now + ttl})
end

if writer then
  return cjson.encode({outcome='busy', holder=writer})
end
local fence = redis.call('HINCRBY', KEYS[1], 'fence', 1)
readers[ARGV[1]] = {expires_ms=now + ttl, fence=fence}
redis.call('HSET', KEYS[1], 'readers', cjson.encode(readers))
update_descriptor(KEYS[2], ARGV[1], 'held_locks', ARGV[5], true)
return cjson.encode({outcome='ok', fence=fence, expires_ms=now + ttl})
"#,
    mem: acquire_file_mem,
};

fn acquire_file_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[3].parse().unwrap_or(0);
    let ttl: u64 = args[2].parse().unwrap_or(0);
    sweep_mem(state, &keys[0], now)?;

    let writer = state.hget(&keys[0], "writer");
    let mut readers = match state.hget(&keys[0], "readers") {
        Some(raw) => parse_json(&raw, "readers")?,
        None => json!({}),
    };
    let reader_count = readers.as_object().map(|m| m.len()).unwrap_or(0);

    if args[1] == "write" {
        if let Some(holder) = &writer {
            if holder != &args[0] {
                return reply(json!({"outcome": "busy", "holder": holder}));
            }
        }
        if reader_count > 0 {
            return reply(json!({"outcome": "busy", "holder": "readers"}));
        }
        if writer.as_deref() == Some(args[0].as_str()) {
            // Re-entrant refresh keeps the original fence
            state.hset(&keys[0], "writer_expires_ms", &(now + ttl).to_string());
            let fence = state
                .hget(&keys[0], "writer_fence")
                .and_then(|f| f.parse::<u64>().ok())
                .unwrap_or(0);
            return reply(json!({"outcome": "ok", "fence": fence, "expires_ms": now + ttl}));
        }
        let fence = state.hincrby(&keys[0], "fence", 1)? as u64;
        state.hset(&keys[0], "writer", &args[0]);
        state.hset(&keys[0], "writer_expires_ms", &(now + ttl).to_string());
        state.hset(&keys[0], "writer_fence", &fence.to_string());
        update_descriptor_mem(state, &keys[1], &args[0], "held_locks", &json!(args[4]), true)?;
        return reply(json!({"outcome": "ok", "fence": fence, "expires_ms": now + ttl}));
    }

    if let Some(holder) = writer {
        return reply(json!({"outcome": "busy", "holder": holder}));
    }
    let fence = state.hincrby(&keys[0], "fence", 1)? as u64;
    readers[&args[0]] = json!({"expires_ms": now + ttl, "fence": fence});
    state.hset(&keys[0], "readers", &readers.to_string());
    update_descriptor_mem(state, &keys[1], &args[0], "held_locks", &json!(args[4]), true)?;
    reply(json!({"outcome": "ok", "fence": fence, "expires_ms": now + ttl}))
}

/// KEYS: [lock_hash, agents_registry]
/// ARGV: [agent_id, mode, fence, now_ms, digest]
pub static RELEASE_FILE: StoreScript = StoreScript {
    name: "coordinator_release_file",
    lua: r#"
local function sweep(lock_key, now)
  local wexp = tonumber(redis.call('HGET', lock_key, 'writer_expires_ms') or '0')
  if redis.call('HEXISTS', lock_key, 'writer') == 1 and wexp <= now then
    redis.call('HDEL', lock_key, 'writer', 'writer_expires_ms', 'writer_fence')
  end
  local raw = redis.call('HGET', lock_key, 'readers')
  if raw then
    local readers = cjson.decode(raw)
    local changed = false
    for agent, entry in pairs(readers) do
      if tonumber(entry.expires_ms) <= now then
        readers[agent] = nil
        changed = true
      end
    end
    if changed then
      if next(readers) == nil then
        redis.call('HDEL', lock_key, 'readers')
      else
        redis.call('HSET', lock_key, 'readers', cjson.encode(readers))
      end
    end
  end
end

local function update_descriptor(registry_key, agent_id, field, value, add)
  local raw = redis.call('HGET', registry_key, agent_id)
  if not raw then return end
  local desc = cjson.decode(raw)
  local items = desc[field]
  if type(items) ~= 'table' then items = {} end
  local out = {}
  local present = false
  for _, v in ipairs(items) do
    if v == value then
      present = true
      if add then out[#out + 1] = v end
    else
      out[#out + 1] = v
    end
  end
  if add and not present then out[#out + 1] = value end
  desc[field] = out
  redis.call('HSET', registry_key, agent_id, cjson.encode(desc))
end

local now = tonumber(ARGV[4])
sweep(KEYS[1], now)

if ARGV[2] == 'write' then
  local writer = redis.call('HGET', KEYS[1], 'writer')
  local fence = redis.call('HGET', KEYS[1], 'writer_fence')
  if writer ~= ARGV[1] or fence ~= ARGV[3] then
    return cjson.encode({outcome='stale'})
  end
  redis.call('HDEL', KEYS[1], 'writer', 'writer_expires_ms', 'writer_fence')
  update_descriptor(KEYS[2], ARGV[1], 'held_locks', ARGV[5], false)
  return cjson.encode({outcome='ok'})
end

local raw = redis.call('HGET', KEYS[1], 'readers')
local readers = raw and cjson.decode(raw) or {}
local entry = readers[ARGV[1]]
if not entry or tostring(entry.fence) ~= ARGV[3] then
  return cjson.encode({outcome='stale'})
end
readers[ARGV[1]] = nil
if next(readers) == nil then
  redis.call('HDEL', KEYS[1], 'readers')
else
  redis.call('HSET', KEYS[1], 'readers', cjson.encode(readers))
end
update_descriptor(KEYS[2], ARGV[1], 'held_locks', ARGV[5], false)
return cjson.encode({outcome='ok'})
"#,
    mem: release_file_mem,
};

fn release_file_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let now: u64 = args[3].parse().unwrap_or(0);
    sweep_mem(state, &keys[0], now)?;

    if args[1] == "write" {
        let writer = state.hget(&keys[0], "writer");
        let fence = state.hget(&keys[0], "writer_fence");
        if writer.as_deref() != Some(args[0].as_str()) || fence.as_deref() != Some(args[2].as_str())
        {
            return reply(json!({"outcome": "stale"}));
        }
        state.hdel(&keys[0], "writer");
        state.hdel(&keys[0], "writer_expires_ms");
        state.hdel(&keys[0], "writer_fence");
        update_descriptor_mem(state, &keys[1], &args[0], "held_locks", &json!(args[4]), false)?;
        return reply(json!({"outcome": "ok"}));
    }

    let Some(raw) = state.hget(&keys[0], "readers") else {
        return reply(json!({"outcome": "stale"}));
    };
    let mut readers = parse_json(&raw, "readers")?;
    let matches = readers[&args[0]]["fence"]
        .as_u64()
        .map(|f| f.to_string() == args[2])
        .unwrap_or(false);
    if !matches {
        return reply(json!({"outcome": "stale"}));
    }
    if let Some(map) = readers.as_object_mut() {
        map.remove(&args[0]);
        if map.is_empty() {
            state.hdel(&keys[0], "readers");
        } else {
            state.hset(&keys[0], "readers", &readers.to_string());
        }
    }
    update_descriptor_mem(state, &keys[1], &args[0], "held_locks", &json!(args[4]), false)?;
    reply(json!({"outcome": "ok"}))
}

/// KEYS: [port_key, agents_registry]
/// ARGV: [agent_id, ttl_ms, port]
pub static RESERVE_PORT: StoreScript = StoreScript {
    name: "coordinator_reserve_port",
    lua: r#"
local function update_descriptor(registry_key, agent_id, field, value, add)
  local raw = redis.call('HGET', registry_key, agent_id)
  if not raw then return end
  local desc = cjson.decode(raw)
  local items = desc[field]
  if type(items) ~= 'table' then items = {} end
  local out = {}
  local present = false
  for _, v in ipairs(items) do
    if v == value then
      present = true
      if add then out[#out + 1] = v end
    else
      out[#out + 1] = v
    end
  end
  if add and not present then out[#out + 1] = value end
  desc[field] = out
  redis.call('HSET', registry_key, agent_id, cjson.encode(desc))
end

local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', tonumber(ARGV[2]))
if not ok then
  local holder = redis.call('GET', KEYS[1])
  if holder == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
    return cjson.encode({outcome='ok', refreshed=true})
  end
  return cjson.encode({outcome='busy', holder=holder})
end
update_descriptor(KEYS[2], ARGV[1], 'reserved_ports', tonumber(ARGV[3]), true)
return cjson.encode({outcome='ok'})
"#,
    mem: reserve_port_mem,
};

fn reserve_port_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let ttl: u64 = args[1].parse().unwrap_or(0);
    if !state.set_nx_px(&keys[0], &args[0], Some(ttl)) {
        let holder = state.get(&keys[0]);
        if holder.as_deref() == Some(args[0].as_str()) {
            state.expire_ms(&keys[0], ttl);
            return reply(json!({"outcome": "ok", "refreshed": true}));
        }
        return reply(json!({"outcome": "busy", "holder": holder}));
    }
    let port: u64 = args[2].parse().unwrap_or(0);
    update_descriptor_mem(state, &keys[1], &args[0], "reserved_ports", &json!(port), true)?;
    reply(json!({"outcome": "ok"}))
}

/// KEYS: [port_key, agents_registry]
/// ARGV: [agent_id, port]
pub static RELEASE_PORT: StoreScript = StoreScript {
    name: "coordinator_release_port",
    lua: r#"
local function update_descriptor(registry_key, agent_id, field, value, add)
  local raw = redis.call('HGET', registry_key, agent_id)
  if not raw then return end
  local desc = cjson.decode(raw)
  local items = desc[field]
  if type(items) ~= 'table' then items = {} end
  local out = {}
  local present = false
  for _, v in ipairs(items) do
    if v == value then
      present = true
      if add then out[#out + 1] = v end
    else
      out[#out + 1] = v
    end
  end
  if add and not present then out[#out + 1] = value end
  desc[field] = out
  redis.call('HSET', registry_key, agent_id, cjson.encode(desc))
end

local holder = redis.call('GET', KEYS[1])
if not holder then
  update_descriptor(KEYS[2], ARGV[1], 'reserved_ports', tonumber(ARGV[2]), false)
  return cjson.encode({outcome='ok', released=false})
end
if holder ~= ARGV[1] then
  return cjson.encode({outcome='conflict', holder=holder})
end
redis.call('DEL', KEYS[1])
update_descriptor(KEYS[2], ARGV[1], 'reserved_ports', tonumber(ARGV[2]), false)
return cjson.encode({outcome='ok', released=true})
"#,
    mem: release_port_mem,
};

fn release_port_mem(
    state: &mut MemState,
    keys: &[String],
    args: &[String],
) -> Result<Option<String>, FabricError> {
    let port: u64 = args[1].parse().unwrap_or(0);
    let Some(holder) = state.get(&keys[0]) else {
        update_descriptor_mem(state, &keys[1], &args[0], "reserved_ports", &json!(port), false)?;
        return reply(json!({"outcome": "ok", "released": false}));
    };
    if holder != args[0] {
        return reply(json!({"outcome": "conflict", "holder": holder}));
    }
    state.del(&keys[0]);
    update_descriptor_mem(state, &keys[1], &args[0], "reserved_ports", &json!(port), false)?;
    reply(json!({"outcome": "ok", "released": true}))
}
