//! Annotate command implementation

use anyhow::{bail, Result};

use crate::model::GameAnnotation;
use crate::store::Store;

pub fn run(store: &mut dyn Store, game_id: &str, annotation: GameAnnotation) -> Result<()> {
    if annotation.is_empty() {
        bail!("nothing to update: pass --white-accuracy, --black-accuracy or --acpl");
    }

    if store.apply_update(game_id, &annotation)? {
        println!("✅ Updated {}", game_id);
    } else {
        println!("Game not found: {}", game_id);
    }
    Ok(())
}
