pub mod state;

pub use state::{
    SETTINGS_DIRECTORY_NAME, SETTINGS_FILE_NAME, SettingsError, SettingsStore, ThemeMode,
    UiSettings,
};
