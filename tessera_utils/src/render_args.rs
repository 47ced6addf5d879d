use argh::FromArgs;
use std::sync::LazyLock;

fn positive(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(0) => Err("value must be greater than zero".to_string()),
        Ok(v) => Ok(v),
        Err(e) => Err(e.to_string()),
    }
}

/// Renderer arguments
#[derive(Debug, Default, FromArgs)]
pub struct RenderArgs {
    #[argh(switch, hidden_help)]
    pub no_shadows: bool,
    #[argh(switch, hidden_help)]
    pub no_skybox_capture: bool,
    #[argh(switch, hidden_help)]
    pub log_stats: bool,

    #[argh(option, hidden_help, from_str_fn(positive))]
    pub shadow_map_size: Option<u32>,
    #[argh(option, hidden_help)]
    pub shadowed_lights: Option<u32>,
}

impl RenderArgs {
    fn init() -> Option<RenderArgs> {
        let mut args = std::env::args();
        let cmd_name = args.next()?;
        let args: Vec<String> = args.collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        RenderArgs::from_args(&[&cmd_name], &args).ok()
    }

    pub fn get() -> &'static RenderArgs {
        static INSTANCE: LazyLock<RenderArgs> =
            LazyLock::new(|| RenderArgs::init().unwrap_or_default());
        &INSTANCE
    }
}
