//! Segmentation id allocator.
//!
//! Every `(physical_network, segmentation_id)` pair that may be handed out
//! has a row in `segmentation_id_allocation`. Rows are created for the
//! configured ranges by [`sync_network_states`], or on demand by
//! [`reserve_specific_network`] for ids a provider asks for outside them.
//!
//! ```text
//!   absent --sync--> free <--reserve/release--> allocated
//!   absent --reserve_specific (out of range)--> allocated
//!   free   --sync (range shrank) / release (out of range)--> absent
//! ```
//!
//! An allocated row is never deleted. All functions take a connection and
//! open their own (sub)transaction on it, so they compose inside a caller's
//! transaction: rolling that back undoes the allocation too.

use std::collections::{BTreeSet, HashMap};

use eswitch_common::NetworkVlanRanges;
use sqlx::{Connection, FromRow, SqliteConnection};
use tracing::{debug, info, instrument, warn};

use crate::error::{PluginError, Result};

/// One row of the allocation table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SegmentationIdAllocation {
    pub physical_network: String,
    pub segmentation_id: i64,
    pub allocated: bool,
}

/// Rows touched by [`sync_network_states`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
}

/// Makes the free rows match `ranges`.
///
/// For each configured physical network every in-range id gets a row, and
/// free rows outside the ranges are dropped. Free rows of physical networks
/// that are no longer configured are dropped. Allocated rows are kept
/// whatever the configuration says.
#[instrument(skip_all)]
pub async fn sync_network_states(conn: &mut SqliteConnection, ranges: &NetworkVlanRanges) -> Result<SyncReport> {
    let db = |e| PluginError::database("sync_network_states", e);
    let mut tx = conn.begin().await.map_err(db)?;
    let mut report = SyncReport::default();

    let rows: Vec<SegmentationIdAllocation> = sqlx::query_as(
        "SELECT physical_network, segmentation_id, allocated FROM segmentation_id_allocation",
    )
    .fetch_all(&mut *tx)
    .await
    .map_err(db)?;

    let mut existing: HashMap<String, Vec<SegmentationIdAllocation>> = HashMap::new();
    for row in rows {
        existing.entry(row.physical_network.clone()).or_default().push(row);
    }

    for physical_network in ranges.physical_networks() {
        let mut missing: BTreeSet<i64> = ranges.allocatable_ids(physical_network);

        for row in existing.remove(physical_network).unwrap_or_default() {
            if missing.remove(&row.segmentation_id) || row.allocated {
                continue;
            }
            debug!(physical_network, segmentation_id = row.segmentation_id, "Removing out of range id");
            sqlx::query(
                "DELETE FROM segmentation_id_allocation \
                 WHERE physical_network = ? AND segmentation_id = ? AND allocated = 0",
            )
            .bind(physical_network)
            .bind(row.segmentation_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            report.removed += 1;
        }

        for segmentation_id in missing {
            sqlx::query(
                "INSERT INTO segmentation_id_allocation (physical_network, segmentation_id, allocated) \
                 VALUES (?, ?, 0)",
            )
            .bind(physical_network)
            .bind(segmentation_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            report.added += 1;
        }
    }

    for physical_network in existing.keys() {
        let done = sqlx::query(
            "DELETE FROM segmentation_id_allocation WHERE physical_network = ? AND allocated = 0",
        )
        .bind(physical_network)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if done.rows_affected() > 0 {
            debug!(%physical_network, removed = done.rows_affected(), "Retired unconfigured physical network");
        }
        report.removed += done.rows_affected() as usize;
    }

    tx.commit().await.map_err(db)?;
    info!(added = report.added, removed = report.removed, "Synchronized segmentation ids");
    Ok(report)
}

/// Row for one id, if any.
pub async fn get_network_state(
    conn: &mut SqliteConnection,
    physical_network: &str,
    segmentation_id: i64,
) -> Result<Option<SegmentationIdAllocation>> {
    sqlx::query_as(
        "SELECT physical_network, segmentation_id, allocated FROM segmentation_id_allocation \
         WHERE physical_network = ? AND segmentation_id = ?",
    )
    .bind(physical_network)
    .bind(segmentation_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| PluginError::database("get_network_state", e))
}

/// Rows of one physical network, by id.
pub async fn get_network_states(
    conn: &mut SqliteConnection,
    physical_network: &str,
) -> Result<Vec<SegmentationIdAllocation>> {
    sqlx::query_as(
        "SELECT physical_network, segmentation_id, allocated FROM segmentation_id_allocation \
         WHERE physical_network = ? ORDER BY segmentation_id",
    )
    .bind(physical_network)
    .fetch_all(conn)
    .await
    .map_err(|e| PluginError::database("get_network_states", e))
}

/// Takes any free id on any physical network.
#[instrument(skip_all)]
pub async fn reserve_network(conn: &mut SqliteConnection) -> Result<(String, i64)> {
    let db = |e| PluginError::database("reserve_network", e);
    let mut tx = conn.begin().await.map_err(db)?;

    let reserved: Option<(String, i64)> = sqlx::query_as(
        r#"
        UPDATE segmentation_id_allocation SET allocated = 1
        WHERE rowid = (
            SELECT rowid FROM segmentation_id_allocation
            WHERE allocated = 0
            ORDER BY physical_network, segmentation_id
            LIMIT 1
        )
        RETURNING physical_network, segmentation_id
        "#,
    )
    .fetch_optional(&mut *tx)
    .await
    .map_err(db)?;

    let Some((physical_network, segmentation_id)) = reserved else {
        return Err(PluginError::NoNetworkAvailable);
    };
    tx.commit().await.map_err(db)?;

    debug!(%physical_network, segmentation_id, "Reserved segmentation id");
    Ok((physical_network, segmentation_id))
}

/// Takes exactly `(physical_network, segmentation_id)`.
///
/// An id outside the configured ranges has no row yet; it is created
/// allocated.
#[instrument(skip(conn))]
pub async fn reserve_specific_network(
    conn: &mut SqliteConnection,
    physical_network: &str,
    segmentation_id: i64,
) -> Result<()> {
    let db = |e| PluginError::database("reserve_specific_network", e);
    let mut tx = conn.begin().await.map_err(db)?;

    let taken = sqlx::query(
        "UPDATE segmentation_id_allocation SET allocated = 1 \
         WHERE physical_network = ? AND segmentation_id = ? AND allocated = 0",
    )
    .bind(physical_network)
    .bind(segmentation_id)
    .execute(&mut *tx)
    .await
    .map_err(db)?;

    if taken.rows_affected() == 1 {
        debug!("Reserving specific segmentation id from pool");
    } else {
        let created = sqlx::query(
            "INSERT OR IGNORE INTO segmentation_id_allocation (physical_network, segmentation_id, allocated) \
             VALUES (?, ?, 1)",
        )
        .bind(physical_network)
        .bind(segmentation_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if created.rows_affected() == 0 {
            return Err(PluginError::SegmentationIdInUse {
                physical_network: physical_network.to_string(),
                segmentation_id,
            });
        }
        debug!("Reserving specific segmentation id outside pool");
    }

    tx.commit().await.map_err(db)?;
    Ok(())
}

/// Returns an id to the pool, or forgets it if it lies outside the
/// configured ranges. A missing row is logged and otherwise ignored.
#[instrument(skip(conn, ranges))]
pub async fn release_network(
    conn: &mut SqliteConnection,
    physical_network: &str,
    segmentation_id: i64,
    ranges: &NetworkVlanRanges,
) -> Result<()> {
    let db = |e| PluginError::database("release_network", e);
    let mut tx = conn.begin().await.map_err(db)?;

    let inside = ranges.contains(physical_network, segmentation_id);
    let query = if inside {
        "UPDATE segmentation_id_allocation SET allocated = 0 \
         WHERE physical_network = ? AND segmentation_id = ?"
    } else {
        "DELETE FROM segmentation_id_allocation WHERE physical_network = ? AND segmentation_id = ?"
    };
    let done = sqlx::query(query)
        .bind(physical_network)
        .bind(segmentation_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

    tx.commit().await.map_err(db)?;

    if done.rows_affected() == 0 {
        warn!("segmentation id not found in allocation table");
    } else if inside {
        debug!("Released segmentation id to pool");
    } else {
        debug!("Released segmentation id outside pool");
    }
    Ok(())
}
