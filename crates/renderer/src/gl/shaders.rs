//! GLSL ES sources for the two compositing programs.
//!
//! Both programs share the vertex stage: positions pass straight through and
//! texture coordinates are multiplied by the per-frame sampling transform.

pub(crate) const ATTRIB_POSITION: &str = "a_position";
pub(crate) const ATTRIB_TEX_COORD: &str = "a_tex_coord";
pub(crate) const UNIFORM_TRANSFORM: &str = "u_transform";
pub(crate) const UNIFORM_TEXTURE: &str = "u_texture";

/// Which fragment stage a program samples with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ProgramKind {
    /// Samples the decoder's external image (`samplerExternalOES`).
    External,
    /// Samples an ordinary 2D texture.
    Texture2d,
}

impl ProgramKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ProgramKind::External => "external-source",
            ProgramKind::Texture2d => "texture-2d",
        }
    }

    pub(crate) fn fragment_source(self) -> &'static str {
        match self {
            ProgramKind::External => FRAGMENT_EXTERNAL_GLSL,
            ProgramKind::Texture2d => FRAGMENT_2D_GLSL,
        }
    }

    pub(crate) fn vertex_source(self) -> &'static str {
        VERTEX_GLSL
    }
}

const VERTEX_GLSL: &str = r"#version 100
attribute vec3 a_position;
attribute vec2 a_tex_coord;
uniform mat4 u_transform;
varying vec2 v_tex_coord;

void main() {
    gl_Position = vec4(a_position, 1.0);
    v_tex_coord = (u_transform * vec4(a_tex_coord, 0.0, 1.0)).xy;
}
";

const FRAGMENT_EXTERNAL_GLSL: &str = r"#version 100
#extension GL_OES_EGL_image_external : require
precision mediump float;
uniform samplerExternalOES u_texture;
varying vec2 v_tex_coord;

void main() {
    gl_FragColor = texture2D(u_texture, v_tex_coord);
}
";

const FRAGMENT_2D_GLSL: &str = r"#version 100
precision mediump float;
uniform sampler2D u_texture;
varying vec2 v_tex_coord;

void main() {
    gl_FragColor = texture2D(u_texture, v_tex_coord);
}
";
