use gumdrop::Options;

#[derive(Debug, Options)]
pub struct AppOptions {
    #[options(help = "print this help message")]
    pub help: bool,

    #[options(free, help = "path to the ROM to run")]
    pub rom_path: Option<String>,

    #[options(help = "path to the 16 KB GBA BIOS image")]
    pub bios: Option<String>,

    #[options(help = "skip the BIOS boot animation and jump straight to the game")]
    pub skip_bios: bool,

    #[options(help = "integer window scale factor", default = "3")]
    pub scale: u32,

    #[options(help = "run at uncapped speed instead of 60 fps")]
    pub uncapped_speed: bool,

    #[options(help = "apply the LCD colour filter")]
    pub color_filter: bool,
}
