pub mod cameras;
pub mod exports;
pub mod frames;
pub mod settings;
pub mod timelapses;

pub use cameras::CamerasRepository;
pub use exports::ExportsRepository;
pub use frames::FramesRepository;
pub use settings::SettingsRepository;
pub use timelapses::TimelapsesRepository;
