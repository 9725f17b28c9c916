use tracing::info;

/// Loads levels on the server.
pub trait SceneLoader: Send {
    /// If `use_network_scene_manager` is true, the scene change is replicated to the connected clients
    fn load_scene(&mut self, scene_name: &str, use_network_scene_manager: bool);
}

/// [`SceneLoader`] for headless servers that only keeps track of the requested scene
#[derive(Default, Debug)]
pub struct LogSceneLoader {
    current: Option<String>,
}

impl LogSceneLoader {
    pub fn current_scene(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

impl SceneLoader for LogSceneLoader {
    fn load_scene(&mut self, scene_name: &str, use_network_scene_manager: bool) {
        info!(scene_name, use_network_scene_manager, "Loading scene");
        self.current = Some(scene_name.to_string());
    }
}
