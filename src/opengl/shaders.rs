//! Shader program assembly
//!
//! The compositor's shaders are put together at runtime. Each OpenGL plugin may contribute
//! a [`ShaderContribution`]: GLSL source for the vertex and/or fragment stage defining a
//! function named after the plugin. The assembled program is the fixed header, every
//! contribution in plugin load order, and a fixed `main()` that calls each contributed
//! function after the default computation. Contributions are validated before anything is
//! concatenated.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::CString;

use gl::types::{GLchar, GLenum, GLint, GLuint};
use log::{debug, info};

use crate::error::ShaderError;

pub const ATTR_MAIN_TEX_COORD: &str = "fb_InitMainTexCoord";
pub const ATTR_PRIM_POS: &str = "fb_InitPrimPos";
pub const ATTR_SHAPE_TEX_COORD: &str = "fb_InitShapeTexCoord";
pub const UNIFORM_ALPHA: &str = "fb_Alpha";
pub const UNIFORM_MAIN_TEXTURE: &str = "fb_MainTexture";
pub const UNIFORM_SHAPE_TEXTURE: &str = "fb_ShapeTexture";

const VERSION_LINE: &str = "#version 120\n\n";

const VERTEX_HEADER: &str = "\
attribute vec2 fb_InitMainTexCoord;
attribute vec2 fb_InitPrimPos;
attribute vec2 fb_InitShapeTexCoord;

varying vec2 fb_MainTexCoord;
varying vec2 fb_ShapeTexCoord;
";

const FRAGMENT_HEADER: &str = "\
uniform float fb_Alpha;
uniform sampler2D fb_MainTexture;
uniform sampler2D fb_ShapeTexture;

varying vec2 fb_MainTexCoord;
varying vec2 fb_ShapeTexCoord;
";

const VERTEX_MAIN: &str = "\
void main() {
    gl_Position = vec4(fb_InitPrimPos, 0.0, 1.0);
    fb_MainTexCoord = fb_InitMainTexCoord;
    fb_ShapeTexCoord = fb_InitShapeTexCoord;
";

const FRAGMENT_MAIN: &str = "\
void main() {
    gl_FragColor = texture2D(fb_MainTexture, fb_MainTexCoord)
                 * texture2D(fb_ShapeTexture, fb_ShapeTexCoord)
                 * vec4(1.0, 1.0, 1.0, fb_Alpha);
";

/// GLSL a plugin adds to the compositor's shaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderContribution {
    /// Name of the function `main()` calls; must equal the plugin name.
    pub entry_point: String,
    pub vertex_source: Option<String>,
    pub fragment_source: Option<String>,
    /// Uniforms the plugin sets; each must be declared in one of the sources.
    pub uniforms: Vec<String>,
}

impl ShaderContribution {
    pub fn fragment(entry_point: &str, source: &str) -> Self {
        Self {
            entry_point: entry_point.to_string(),
            vertex_source: None,
            fragment_source: Some(source.to_string()),
            uniforms: Vec::new(),
        }
    }

    pub fn with_uniform(mut self, uniform: &str) -> Self {
        self.uniforms.push(uniform.to_string());
        self
    }

    /// Checks the contribution of the plugin called `plugin_name`.
    pub fn validate(&self, plugin_name: &str) -> Result<(), ShaderError> {
        if !is_identifier(&self.entry_point)
            || self.entry_point.starts_with("gl_")
            || self.entry_point.starts_with("fb_")
            || self.entry_point == "main"
        {
            return Err(ShaderError::InvalidEntryPoint(self.entry_point.clone()));
        }
        if self.entry_point != plugin_name {
            return Err(ShaderError::EntryPointMismatch {
                plugin: plugin_name.to_string(),
                entry_point: self.entry_point.clone(),
            });
        }

        for (stage, source) in self.stages() {
            if !defines_function(source, &self.entry_point) {
                return Err(ShaderError::MissingEntryPoint {
                    entry_point: self.entry_point.clone(),
                    stage,
                });
            }
        }

        for uniform in &self.uniforms {
            let declared = self
                .stages()
                .any(|(_, source)| declares_uniform(source, uniform));
            if !declared {
                return Err(ShaderError::UndeclaredUniform {
                    entry_point: self.entry_point.clone(),
                    uniform: uniform.clone(),
                });
            }
        }
        Ok(())
    }

    fn stages(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("vertex", self.vertex_source.as_deref()),
            ("fragment", self.fragment_source.as_deref()),
        ]
        .into_iter()
        .filter_map(|(stage, source)| source.map(|s| (stage, s)))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
}

fn defines_function(source: &str, name: &str) -> bool {
    let compact: String = source.split_whitespace().collect::<Vec<_>>().join(" ");
    compact.contains(&format!("void {}()", name)) || compact.contains(&format!("void {} ()", name))
}

fn declares_uniform(source: &str, name: &str) -> bool {
    source.lines().any(|line| {
        let mut words = tokens(line);
        words.next() == Some("uniform") && words.any(|w| w == name)
    })
}

/// Complete vertex and fragment shader sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledShaders {
    pub vertex: String,
    pub fragment: String,
}

/// Validates `contributions` (pairs of plugin name and contribution, in load order) and
/// concatenates the program sources.
pub fn assemble_shaders(
    contributions: &[(&str, ShaderContribution)],
) -> Result<AssembledShaders, ShaderError> {
    let mut seen = HashSet::new();
    for (plugin, contribution) in contributions {
        contribution.validate(plugin)?;
        if !seen.insert(contribution.entry_point.as_str()) {
            return Err(ShaderError::DuplicateEntryPoint(
                contribution.entry_point.clone(),
            ));
        }
    }

    let build = |header: &str, main: &str, source: fn(&ShaderContribution) -> Option<&str>| {
        let mut out = String::from(VERSION_LINE);
        out.push_str(header);
        for (_, contribution) in contributions {
            if let Some(body) = source(contribution) {
                out.push('\n');
                out.push_str(body.trim_end());
                out.push('\n');
            }
        }
        out.push('\n');
        out.push_str(main);
        for (_, contribution) in contributions {
            if source(contribution).is_some() {
                out.push_str(&format!("    {}();\n", contribution.entry_point));
            }
        }
        out.push_str("}\n");
        out
    };

    Ok(AssembledShaders {
        vertex: build(VERTEX_HEADER, VERTEX_MAIN, |c| c.vertex_source.as_deref()),
        fragment: build(FRAGMENT_HEADER, FRAGMENT_MAIN, |c| c.fragment_source.as_deref()),
    })
}

/// A linked shader program with cached attribute and uniform locations.
pub struct OpenGlShaderProgram {
    program: GLuint,
    shaders: [GLuint; 2],
    main_tex_coord_attrib: GLuint,
    prim_pos_attrib: GLuint,
    shape_tex_coord_attrib: GLuint,
    uniforms: RefCell<HashMap<String, GLint>>,
}

impl OpenGlShaderProgram {
    pub fn new(sources: &AssembledShaders) -> Result<Self, ShaderError> {
        let vertex = compile_shader(gl::VERTEX_SHADER, "vertex", &sources.vertex)?;
        let fragment = match compile_shader(gl::FRAGMENT_SHADER, "fragment", &sources.fragment) {
            Ok(fragment) => fragment,
            Err(e) => {
                unsafe { gl::DeleteShader(vertex) };
                return Err(e);
            }
        };

        let program = unsafe {
            let program = gl::CreateProgram();
            gl::AttachShader(program, vertex);
            gl::AttachShader(program, fragment);
            gl::LinkProgram(program);
            program
        };

        let mut program = Self {
            program,
            shaders: [vertex, fragment],
            main_tex_coord_attrib: 0,
            prim_pos_attrib: 0,
            shape_tex_coord_attrib: 0,
            uniforms: RefCell::new(HashMap::new()),
        };

        let mut linked = 0;
        unsafe { gl::GetProgramiv(program.program, gl::LINK_STATUS, &mut linked) };
        if linked == 0 {
            return Err(ShaderError::Link(program_log(program.program)));
        }

        program.main_tex_coord_attrib = program.attrib_location(ATTR_MAIN_TEX_COORD)?;
        program.prim_pos_attrib = program.attrib_location(ATTR_PRIM_POS)?;
        program.shape_tex_coord_attrib = program.attrib_location(ATTR_SHAPE_TEX_COORD)?;

        program.use_program();
        program.set_uniform_1i(UNIFORM_MAIN_TEXTURE, 0);
        program.set_uniform_1i(UNIFORM_SHAPE_TEXTURE, 1);
        info!("🎨 Shader program linked");
        Ok(program)
    }

    pub fn use_program(&self) {
        unsafe { gl::UseProgram(self.program) };
    }

    pub fn main_tex_coord_attrib(&self) -> GLuint {
        self.main_tex_coord_attrib
    }

    pub fn prim_pos_attrib(&self) -> GLuint {
        self.prim_pos_attrib
    }

    pub fn shape_tex_coord_attrib(&self) -> GLuint {
        self.shape_tex_coord_attrib
    }

    /// Location of a uniform, or -1 if the program does not use it.
    pub fn uniform_location(&self, name: &str) -> GLint {
        if let Some(&location) = self.uniforms.borrow().get(name) {
            return location;
        }
        let location = match CString::new(name) {
            Ok(c_name) => unsafe { gl::GetUniformLocation(self.program, c_name.as_ptr()) },
            Err(_) => -1,
        };
        if location < 0 {
            debug!("Uniform '{}' is not active in the program", name);
        }
        self.uniforms.borrow_mut().insert(name.to_string(), location);
        location
    }

    pub fn set_uniform_1f(&self, name: &str, value: f32) {
        unsafe { gl::Uniform1f(self.uniform_location(name), value) };
    }

    pub fn set_uniform_1i(&self, name: &str, value: i32) {
        unsafe { gl::Uniform1i(self.uniform_location(name), value) };
    }

    pub fn set_alpha(&self, alpha: f32) {
        self.set_uniform_1f(UNIFORM_ALPHA, alpha);
    }

    fn attrib_location(&self, name: &str) -> Result<GLuint, ShaderError> {
        let c_name = CString::new(name).map_err(|_| ShaderError::Link(name.to_string()))?;
        let location = unsafe { gl::GetAttribLocation(self.program, c_name.as_ptr()) };
        u32::try_from(location)
            .map_err(|_| ShaderError::Link(format!("attribute {} is not active", name)))
    }
}

impl Drop for OpenGlShaderProgram {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteProgram(self.program);
            for shader in self.shaders {
                gl::DeleteShader(shader);
            }
        }
    }
}

fn compile_shader(kind: GLenum, stage: &'static str, source: &str) -> Result<GLuint, ShaderError> {
    let c_source = CString::new(source).map_err(|_| ShaderError::Compile {
        stage,
        log: "source contains a NUL byte".to_string(),
    })?;
    unsafe {
        let shader = gl::CreateShader(kind);
        gl::ShaderSource(shader, 1, &c_source.as_ptr(), std::ptr::null());
        gl::CompileShader(shader);

        let mut compiled = 0;
        gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut compiled);
        if compiled == 0 {
            let log = shader_log(shader);
            gl::DeleteShader(shader);
            return Err(ShaderError::Compile { stage, log });
        }
        Ok(shader)
    }
}

fn shader_log(shader: GLuint) -> String {
    let mut length = 0;
    unsafe { gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut length) };
    let mut buffer = vec![0u8; length.max(1) as usize];
    unsafe {
        gl::GetShaderInfoLog(shader, length, std::ptr::null_mut(), buffer.as_mut_ptr() as *mut GLchar)
    };
    String::from_utf8_lossy(&buffer).trim_end_matches('\0').to_string()
}

fn program_log(program: GLuint) -> String {
    let mut length = 0;
    unsafe { gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut length) };
    let mut buffer = vec![0u8; length.max(1) as usize];
    unsafe {
        gl::GetProgramInfoLog(program, length, std::ptr::null_mut(), buffer.as_mut_ptr() as *mut GLchar)
    };
    String::from_utf8_lossy(&buffer).trim_end_matches('\0').to_string()
}
