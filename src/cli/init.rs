use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();

    if let Some(dir) = data_dir {
        let expanded = shellexpand_path(&dir);
        std::fs::create_dir_all(&expanded)?;
        // Canonical once it exists.
        settings.data_dir = shellexpand_path(&expanded);
    }
    save_settings(&settings)?;

    std::fs::create_dir_all(&settings.data_dir)?;
    std::fs::create_dir_all(settings.uploads_dir())?;

    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;

    println!("Initialized ledgerlink at {}", settings.data_dir);
    Ok(())
}
