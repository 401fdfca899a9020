//! On-disk dataset layout.
//!
//! A dataset directory holds:
//!
//! - `metadata.bin`: every octant's box, counts and child ids
//! - `particles/particles_<id>.bin`: the payload of each octant that has
//!   objects, the id zero-padded to six digits
//!
//! Payloads are written first and the metadata last, so an interrupted
//! write never leaves a directory that looks complete.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::DVec3;
use tracing::{debug, info};

use lodstar_codec::{MetadataRecord, NO_CHILD, ParticleRecord};

use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::id::OctantId;
use crate::octant::{NodeIndex, Octant};
use crate::octree::Octree;

/// Name of the metadata file inside a dataset directory.
pub const METADATA_FILE: &str = "metadata.bin";

/// Name of the payload directory inside a dataset directory.
pub const PARTICLES_DIR: &str = "particles";

#[must_use]
pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

/// Path of the payload file of octant `id`.
#[must_use]
pub fn payload_path(dir: &Path, id: OctantId) -> PathBuf {
    dir.join(PARTICLES_DIR)
        .join(format!("particles_{:06}.bin", id.0))
}

/// Write the payload of every octant holding objects, then the metadata.
pub fn write_dataset(tree: &Octree, dir: &Path) -> Result<()> {
    let particles = dir.join(PARTICLES_DIR);
    fs::create_dir_all(&particles).map_err(|e| Error::io(&particles, e))?;

    let mut files = 0;
    for octant in tree.iter() {
        let Some(group) = octant.payload().filter(|g| !g.is_empty()) else {
            continue;
        };
        let path = payload_path(dir, octant.id());
        write_file(&path, |w| lodstar_codec::encode_particles(w, group.records()))?;
        debug!("Wrote {} objects of octant {}", group.len(), octant.id());
        files += 1;
    }

    let records = metadata_records(tree)?;
    let count = records.len();
    let path = metadata_path(dir);
    write_file(&path, |w| lodstar_codec::write_metadata(w, records))?;
    info!(
        "Wrote {files} payload files and {count} octant records to {}",
        dir.display()
    );
    Ok(())
}

fn write_file(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)
        .and_then(|()| writer.flush())
        .map_err(|e| Error::io(path, e))
}

/// Persisted form of every reachable octant, depth-first.
pub fn metadata_records(tree: &Octree) -> Result<Vec<MetadataRecord>> {
    tree.iter()
        .map(|octant| {
            let count = |value: u64, what: &str| {
                i32::try_from(value).map_err(|_| Error::InvalidParams {
                    detail: format!("octant {} has too many {what} objects", octant.id()),
                })
            };
            let mut children = [NO_CHILD; 8];
            for (entry, slot) in children.iter_mut().zip(0u8..) {
                if let Some(c) = octant.child(slot) {
                    *entry = tree[c].id().0;
                }
            }
            Ok(MetadataRecord {
                id: octant.id().0,
                center: octant.bounds().center.to_array(),
                half_size: octant.bounds().half_size.to_array(),
                depth: i32::try_from(octant.depth()).unwrap_or(i32::MAX),
                own_count: count(octant.own_objects(), "own")?,
                recursive_count: count(octant.recursive_objects(), "recursive")?,
                children,
            })
        })
        .collect()
}

/// Read `metadata.bin` into an octree skeleton with no payloads attached.
pub fn read_metadata(dir: &Path) -> Result<Octree> {
    let path = metadata_path(dir);
    let data = fs::read(&path).map_err(|e| Error::io(&path, e))?;
    let records = lodstar_codec::decode_metadata(&data)?;
    let tree = octree_from_records(&records)?;
    info!(
        "Read {} octants holding {} objects from {}",
        tree.num_octants(),
        tree.root().recursive_objects(),
        path.display()
    );
    Ok(tree)
}

/// Read and decode the payload of octant `id`.
pub fn read_payload(dir: &Path, id: OctantId) -> Result<Vec<ParticleRecord>> {
    let path = payload_path(dir, id);
    let data = fs::read(&path).map_err(|e| Error::io(&path, e))?;
    Ok(lodstar_codec::decode_particles(&data)?)
}

fn integrity(detail: String) -> Error {
    Error::Integrity {
        context: "metadata",
        detail,
    }
}

/// Reassemble a tree from flat records.
///
/// Records are indexed by id first; child ids are then resolved top-down
/// from the root. Every record must be reachable and every count consistent.
pub fn octree_from_records(records: &[MetadataRecord]) -> Result<Octree> {
    let mut by_id: HashMap<u64, &MetadataRecord> = HashMap::with_capacity(records.len());
    for record in records {
        if !OctantId(record.id).is_valid() {
            return Err(integrity(format!("invalid octant id {}", record.id)));
        }
        if by_id.insert(record.id, record).is_some() {
            return Err(integrity(format!("duplicate octant id {}", record.id)));
        }
    }
    let root = by_id
        .get(&OctantId::ROOT.0)
        .copied()
        .ok_or_else(|| integrity("no root record".to_string()))?;

    let mut tree = Octree::new(record_bounds(root));
    apply_counts(tree.node_mut(Octree::ROOT), root)?;

    let mut stack: Vec<(NodeIndex, &MetadataRecord)> = vec![(Octree::ROOT, root)];
    let mut resolved = 1;
    while let Some((index, record)) = stack.pop() {
        let id = OctantId(record.id);
        for (slot, child_id) in record.child_ids() {
            let child = by_id.get(&child_id).copied().ok_or_else(|| {
                integrity(format!("octant {id} refers to missing child {child_id}"))
            })?;
            let slot = u8::try_from(slot).unwrap_or(u8::MAX);
            if id.child(slot) != Some(OctantId(child_id)) {
                return Err(integrity(format!(
                    "octant {child_id} cannot sit in slot {slot} of {id}"
                )));
            }
            let child_index = tree.create_child(index, slot)?;
            let node = tree.node_mut(child_index);
            node.bounds = record_bounds(child);
            apply_counts(node, child)?;
            stack.push((child_index, child));
            resolved += 1;
        }
    }
    if resolved != records.len() {
        return Err(integrity(format!(
            "{} records are not reachable from the root",
            records.len() - resolved
        )));
    }

    for octant in tree.iter() {
        let sum: u64 = octant
            .children()
            .map(|c| tree[c].recursive_objects())
            .sum();
        if octant.recursive_objects() != octant.own_objects() + sum {
            return Err(integrity(format!(
                "recursive count of octant {} is {}, children add up to {}",
                octant.id(),
                octant.recursive_objects(),
                octant.own_objects() + sum
            )));
        }
    }
    Ok(tree)
}

fn record_bounds(record: &MetadataRecord) -> Aabb {
    Aabb::new(
        DVec3::from_array(record.center),
        DVec3::from_array(record.half_size),
    )
}

fn apply_counts(octant: &mut Octant, record: &MetadataRecord) -> Result<()> {
    if i64::from(record.depth) != i64::from(octant.depth()) {
        return Err(integrity(format!(
            "octant {} stored at depth {}",
            record.id, record.depth
        )));
    }
    let (Ok(own), Ok(recursive)) = (
        u64::try_from(record.own_count),
        u64::try_from(record.recursive_count),
    ) else {
        return Err(integrity(format!("negative counts in octant {}", record.id)));
    };
    octant.stored_objects = own;
    octant.set_counts(own, recursive);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::builder::tests::catalog_strategy;
    use crate::builder::{BuildParams, Generator, build};
    use crate::octant::LoadStatus;
    use crate::octree::tests::record;
    use proptest::prelude::*;

    /// Fresh, empty directory under the system temp dir.
    pub(crate) fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lodstar-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Root holding one star and child 6 holding three.
    pub(crate) fn two_node_tree() -> Octree {
        let mut tree = Octree::new(Aabb::new(DVec3::ZERO, DVec3::splat(10.0)));
        let child = tree.create_child(Octree::ROOT, 5).unwrap();
        tree.set_objects(Octree::ROOT, vec![record(1, DVec3::new(1.0, 2.0, 3.0), 0.5)]);
        let mut named = record(2, DVec3::new(5.0, -5.0, 5.0), 4.0);
        named.names = vec!["Mizar".to_string(), "zet UMa".to_string()];
        tree.set_objects(
            child,
            vec![
                named,
                record(3, DVec3::new(6.0, -4.0, 2.0), 6.0),
                record(4, DVec3::new(9.0, -1.0, 8.0), 5.5),
            ],
        );
        tree
    }

    #[test]
    fn test_payload_path_is_zero_padded() {
        let path = payload_path(Path::new("/data"), OctantId(36));
        assert_eq!(path, Path::new("/data/particles/particles_000036.bin"));
    }

    #[test]
    fn test_two_node_dataset_roundtrip() {
        let dir = test_dir("roundtrip");
        let tree = two_node_tree();
        write_dataset(&tree, &dir).unwrap();

        assert!(payload_path(&dir, OctantId::ROOT).exists());
        assert!(payload_path(&dir, OctantId(6)).exists());

        let read = read_metadata(&dir).unwrap();
        assert_eq!(read.num_octants(), 2);
        assert_eq!(read.root().children().count(), 1);
        let child = read.find_octant(OctantId(6)).unwrap();
        assert_eq!(read[child].parent(), Some(Octree::ROOT));
        assert_eq!(read[child].bounds(), tree[child].bounds());
        assert_eq!(read[child].own_objects(), 3);
        assert_eq!(read[child].stored_objects(), 3);
        assert_eq!(read.root().recursive_objects(), 4);
        assert_eq!(read[child].status(), LoadStatus::NotLoaded);
        assert!(read[child].payload().is_none());

        let stars = read_payload(&dir, OctantId(6)).unwrap();
        assert_eq!(stars.iter().map(|s| s.id).collect::<Vec<_>>(), [2, 3, 4]);
        assert_eq!(stars[0].names, vec!["Mizar", "zet UMa"]);
        assert_eq!(stars, tree[child].payload().unwrap().records());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_metadata_is_io_error() {
        let dir = test_dir("missing");
        assert!(matches!(read_metadata(&dir), Err(Error::Io { .. })));
        fs::remove_dir_all(&dir).unwrap();
    }

    fn records() -> Vec<MetadataRecord> {
        metadata_records(&two_node_tree()).unwrap()
    }

    #[test]
    fn test_unresolvable_child() {
        let mut records = records();
        records.pop();
        assert!(matches!(
            octree_from_records(&records),
            Err(Error::Integrity { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_missing_root() {
        let mut dup = records();
        dup.push(dup[1].clone());
        assert!(matches!(octree_from_records(&dup), Err(Error::Integrity { .. })));

        let orphan = vec![records()[1].clone()];
        assert!(matches!(octree_from_records(&orphan), Err(Error::Integrity { .. })));
    }

    #[test]
    fn test_unreachable_record() {
        let mut records = records();
        let mut stray = records[1].clone();
        stray.id = 3;
        records.push(stray);
        assert!(matches!(
            octree_from_records(&records),
            Err(Error::Integrity { .. })
        ));
    }

    #[test]
    fn test_inconsistent_counts() {
        let mut records = records();
        records[0].recursive_count = 10;
        assert!(matches!(
            octree_from_records(&records),
            Err(Error::Integrity { .. })
        ));
    }

    #[test]
    fn test_child_in_wrong_slot() {
        let mut records = records();
        records[0].children.swap(5, 2);
        assert!(matches!(
            octree_from_records(&records),
            Err(Error::Integrity { .. })
        ));
    }

    proptest! {
        #[test]
        fn test_built_tree_metadata_roundtrip(
            catalog in catalog_strategy(),
            max_part in 1usize..20,
            greedy in any::<bool>(),
            post_process in any::<bool>(),
        ) {
            let params = BuildParams {
                generator: if greedy {
                    Generator::GreedyBreadthFirst
                } else {
                    Generator::MagnitudeLevelled
                },
                max_part,
                max_depth: 8,
                post_process,
                child_count: 3,
                parent_count: 10,
                ..BuildParams::default()
            };
            let tree = build(catalog, &params).unwrap().octree;
            let records = metadata_records(&tree).unwrap();

            let mut data = Vec::new();
            lodstar_codec::write_metadata(&mut data, records.clone()).unwrap();
            let decoded = lodstar_codec::decode_metadata(&data).unwrap();
            prop_assert_eq!(&decoded, &records);

            let back = octree_from_records(&decoded).unwrap();
            prop_assert_eq!(back.num_octants(), tree.num_octants());
            prop_assert_eq!(metadata_records(&back).unwrap(), records);
        }
    }
}
