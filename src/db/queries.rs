pub const SELECT_ACTIVE_STATIONS: &str = r#"
SELECT id, external_id, name, latitude, longitude, bank_level, is_active
FROM stations
WHERE is_active = true
ORDER BY id;
"#;

pub const INSERT_READING: &str = r#"
INSERT INTO readings (station_id, level, classification, is_flooded, note, image, source, measured_at, status)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'ACTIVE')
ON CONFLICT (station_id, measured_at) DO NOTHING
RETURNING id, station_id, level, classification, is_flooded, note, image, source,
          measured_at, status, scheduled_delete_at, created_at;
"#;

// Rank by measurement time within each station; everything past the first
// $1 rows that is still ACTIVE becomes PENDING_DELETION. A NULL $3 covers all
// stations.
pub const MARK_FOR_DELETION: &str = r#"
UPDATE readings
SET status = 'PENDING_DELETION',
    scheduled_delete_at = $2
WHERE status = 'ACTIVE'
  AND id IN (
    SELECT id FROM (
        SELECT id,
               ROW_NUMBER() OVER (PARTITION BY station_id ORDER BY measured_at DESC, id DESC) AS rn
        FROM readings
        WHERE status <> 'DELETED'
          AND ($3::BIGINT IS NULL OR station_id = $3)
    ) ranked
    WHERE ranked.rn > $1
  );
"#;

pub const SELECT_PENDING_DELETIONS: &str = r#"
SELECT id, station_id, level, classification, is_flooded, note, image, source,
       measured_at, status, scheduled_delete_at, created_at
FROM readings
WHERE status = 'PENDING_DELETION'
ORDER BY station_id, measured_at;
"#;

pub const HARD_DELETE_READING: &str = r#"
DELETE FROM readings WHERE id = $1 AND status = 'PENDING_DELETION';
"#;

pub const CANCEL_DELETION: &str = r#"
UPDATE readings
SET status = 'ACTIVE',
    scheduled_delete_at = NULL
WHERE id = $1 AND status = 'PENDING_DELETION';
"#;

pub const SELECT_ACTIVE_READINGS_BY_STATION: &str = r#"
SELECT id, station_id, level, classification, is_flooded, note, image, source,
       measured_at, status, scheduled_delete_at, created_at
FROM readings
WHERE station_id = $1 AND status = 'ACTIVE'
ORDER BY measured_at DESC, id DESC
LIMIT $2;
"#;
