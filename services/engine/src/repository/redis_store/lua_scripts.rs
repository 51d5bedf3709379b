//! Redis Lua scripts for atomic operations

/// Apply one unit of work atomically
///
/// Args: [plan_json]
///
/// The plan carries balance deltas (already netted per account and asset),
/// versioned row writes, index updates, journal lines and an optional
/// idempotency record. All guards are evaluated before the first write.
///
/// Returns: {'ok'} | {'insufficient_funds', key, asset} | {'conflict', key} | {'duplicate', key}
pub const COMMIT_UNIT_SCRIPT: &str = r#"
local plan = cjson.decode(ARGV[1])

for _, b in ipairs(plan.balances) do
  if b.guard then
    local current = tonumber(redis.call('HGET', b.key, b.asset) or '0')
    if current + tonumber(b.delta) < 0 then
      return { 'insufficient_funds', b.key, b.asset }
    end
  end
end

for _, w in ipairs(plan.rows) do
  local current = tonumber(redis.call('HGET', w.key, 'version') or '0')
  if current ~= tonumber(w.expected) then
    return { 'conflict', w.key }
  end
end

if plan.idempotency then
  if redis.call('EXISTS', plan.idempotency.key) == 1 then
    return { 'duplicate', plan.idempotency.key }
  end
end

for _, b in ipairs(plan.balances) do
  redis.call('HINCRBY', b.key, b.asset, b.delta)
  redis.call('SADD', plan.accounts_index, b.key)
end

for _, w in ipairs(plan.rows) do
  redis.call('HSET', w.key,
    'version', tostring(tonumber(w.expected) + 1),
    'data', w.data
  )
end

for _, s in ipairs(plan.set_adds) do
  redis.call('SADD', s.key, s.member)
end

for _, m in ipairs(plan.max_values) do
  local current = tonumber(redis.call('GET', m.key) or '0')
  if tonumber(m.value) > current then
    redis.call('SET', m.key, m.value)
  end
end

for _, j in ipairs(plan.journal) do
  redis.call('RPUSH', j.key, j.entry)
end

if plan.idempotency then
  redis.call('SET', plan.idempotency.key, plan.idempotency.value)
end

return { 'ok' }
"#;
