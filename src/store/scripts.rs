//! Lua scripts executed atomically against the shared store (C1).
//!
//! Their textual form is part of the specification (spec §6): each script
//! is the atomicity boundary for its operation and must be evaluated as a
//! single `EVAL`/`EVALSHA` call so no other client observes an intermediate
//! state.

/// decrement(stock_key, sold_key; qty) -> remaining | 0 (sold out) | -1 (invalid)
pub const DECREMENT: &str = r#"
local qty = tonumber(ARGV[1])
if qty == nil or qty <= 0 then
  return -1
end
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current < qty then
  return 0
end
local remaining = redis.call('DECRBY', KEYS[1], qty)
redis.call('INCRBY', KEYS[2], qty)
return remaining
"#;

/// decrement_with_limit(stock_key, sold_key, user_count_key; qty, user_limit)
/// -> remaining | 0 (sold out) | -1 (invalid) | -2 (limit exceeded)
///
/// Folds the per-(user,sku) purchase-limit check into the same atomic
/// script as the decrement, per spec §9's open-question resolution: keeping
/// the limit check separate from the decrement allows a small bypass rate
/// under contention, so this implementation folds it in.
pub const DECREMENT_WITH_LIMIT: &str = r#"
local qty = tonumber(ARGV[1])
local user_limit = tonumber(ARGV[2])
if qty == nil or qty <= 0 then
  return -1
end
local already = tonumber(redis.call('GET', KEYS[3]) or '0')
if already + qty > user_limit then
  return -2
end
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current < qty then
  return 0
end
local remaining = redis.call('DECRBY', KEYS[1], qty)
redis.call('INCRBY', KEYS[2], qty)
redis.call('INCRBY', KEYS[3], qty)
return remaining
"#;

/// rollback(stock_key, sold_key; qty) -> new_stock | -1 (invalid)
pub const ROLLBACK: &str = r#"
local qty = tonumber(ARGV[1])
if qty == nil or qty <= 0 then
  return -1
end
local new_stock = redis.call('INCRBY', KEYS[1], qty)
local new_sold = redis.call('DECRBY', KEYS[2], qty)
if new_sold < 0 then
  redis.call('SET', KEYS[2], 0)
end
return new_stock
"#;

/// rollback_with_limit(stock_key, sold_key, user_count_key; qty) -> new_stock | -1
///
/// Symmetric counterpart to DECREMENT_WITH_LIMIT: also unwinds the
/// per-user counter so a rolled-back purchase does not permanently consume
/// that user's limit.
pub const ROLLBACK_WITH_LIMIT: &str = r#"
local qty = tonumber(ARGV[1])
if qty == nil or qty <= 0 then
  return -1
end
local new_stock = redis.call('INCRBY', KEYS[1], qty)
local new_sold = redis.call('DECRBY', KEYS[2], qty)
if new_sold < 0 then
  redis.call('SET', KEYS[2], 0)
end
local new_count = redis.call('DECRBY', KEYS[3], qty)
if new_count < 0 then
  redis.call('SET', KEYS[3], 0)
end
return new_stock
"#;

/// token_bucket(tokens_key, ts_key; capacity, rate, now_ms) -> 1 (acquired) | 0 (denied)
pub const TOKEN_BUCKET: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])

local tokens = tonumber(redis.call('GET', KEYS[1]))
local last = tonumber(redis.call('GET', KEYS[2]))

if tokens == nil then
  tokens = capacity
end
if last == nil then
  last = now_ms
end

local elapsed = (now_ms - last) / 1000.0
if elapsed < 0 then
  elapsed = 0
end

tokens = math.min(capacity, tokens + elapsed * rate)

local acquired = 0
if tokens >= 1 then
  tokens = tokens - 1
  acquired = 1
end

redis.call('SET', KEYS[1], tostring(tokens))
redis.call('SET', KEYS[2], tostring(now_ms))

if acquired == 1 then
  return {1, tostring(tokens)}
else
  return {0, tostring(tokens)}
end
"#;
