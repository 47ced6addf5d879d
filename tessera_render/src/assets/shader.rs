use crate::release::{Release, ReleaseHook, ResourceId};

/// A GLSL program source holding both stages, separated by `VERT_SRC` and `FRAG_SRC` guards.
///
/// The source has to start with a `#version` directive; defines are inserted right after it.
#[derive(Debug)]
pub struct ShaderDescription {
    id: ResourceId,
    name: String,
    source: String,
    hook: ReleaseHook,
}

impl ShaderDescription {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let id = ResourceId::new();
        Self {
            id,
            name: name.into(),
            source: source.into(),
            hook: ReleaseHook::new(Release::Shader(id)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn release_hook(&self) -> &ReleaseHook {
        &self.hook
    }
}

/// Splits a source into its `#version` line and everything after it.
///
/// Only blank lines and `//` comments may precede the directive.
pub fn split_version(source: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("#version") {
            let body = &source[offset + line.len()..];
            return Some((trimmed, body));
        }
        if !trimmed.is_empty() && !trimmed.starts_with("//") {
            return None;
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_split_from_body() {
        let (version, body) = split_version("// header\n\n#version 330 core\nvoid main() {}\n")
            .expect("version should be found");
        assert_eq!(version, "#version 330 core");
        assert_eq!(body, "void main() {}\n");
    }

    #[test]
    fn version_must_come_first() {
        assert!(split_version("uniform float x;\n#version 330 core\n").is_none());
        assert!(split_version("void main() {}").is_none());
    }
}
