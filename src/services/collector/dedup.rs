use crate::modules::snapshot::SnapshotData;

/// Whether `new` should be stored as a fresh snapshot.
///
/// With no previous snapshot there is always a change. Otherwise the overall
/// triple and both category maps are compared structurally; an absent value
/// equals another absent value and nothing else.
pub fn changed(new: &SnapshotData, previous: Option<&SnapshotData>) -> bool {
    match previous {
        None => true,
        Some(previous) => {
            new.overall != previous.overall
                || new.skills != previous.skills
                || new.bosses != previous.bosses
        }
    }
}
