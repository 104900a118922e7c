use std::{
    path::{Component, Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::{
    eval::{error::EvalError, flow::RequestControl},
    object::{Object, arg, create_object, not_found},
    value::Value,
};

const QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// The script-visible `Server` object.
#[derive(Debug)]
pub struct ServerObject {
    root_dir: PathBuf,
    script_path: String,
    control: Rc<RequestControl>,
}

impl ServerObject {
    pub fn new(root_dir: PathBuf, script_path: &str, control: Rc<RequestControl>) -> Self {
        Self {
            root_dir,
            script_path: script_path.to_string(),
            control,
        }
    }

    /// Resolves a virtual path against the site root. Absolute paths start
    /// at the root, others at the directory of the running script. `..`
    /// never climbs above the root.
    pub fn map_path(&self, path: &str) -> PathBuf {
        let path = path.replace('\\', "/");
        let virtual_path = if path.starts_with('/') {
            path
        } else {
            let script_dir = self
                .script_path
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .unwrap_or_default();
            format!("{}/{}", script_dir, path)
        };

        let mut parts: Vec<&str> = Vec::new();
        for component in Path::new(&virtual_path).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
                Component::ParentDir => {
                    parts.pop();
                }
                _ => {}
            }
        }
        parts
            .into_iter()
            .fold(self.root_dir.clone(), |mapped, part| mapped.join(part))
    }
}

pub fn html_encode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => encoded.push_str("&amp;"),
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '"' => encoded.push_str("&quot;"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Form-style encoding: spaces become `+`.
pub fn url_encode(text: &str) -> String {
    text.split(' ')
        .map(|part| utf8_percent_encode(part, QUERY).to_string())
        .collect::<Vec<_>>()
        .join("+")
}

pub fn url_path_encode(text: &str) -> String {
    utf8_percent_encode(text, PATH).to_string()
}

impl Object for ServerObject {
    fn type_name(&self) -> &str {
        "IServer"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "scripttimeout" => Ok(self
                .control
                .timeout()
                .map(|timeout| Value::from(timeout.as_secs() as i64))
                .unwrap_or_default()),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), EvalError> {
        match name {
            "scripttimeout" => match value.to_int() {
                seconds if seconds > 0 => {
                    self.control
                        .set_timeout(Some(Duration::from_secs(seconds as u64)));
                    Ok(())
                }
                _ => Err(EvalError::InvalidArgument("Server.ScriptTimeout".to_string())),
            },
            _ => Err(not_found(self, name)),
        }
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let text = || arg(args, 0).to_string();
        match name {
            "createobject" => create_object(&text()).map(Value::Object),
            "htmlencode" => Ok(Value::from(html_encode(&text()))),
            "urlencode" => Ok(Value::from(url_encode(&text()))),
            "urlpathencode" => Ok(Value::from(url_path_encode(&text()))),
            "mappath" => Ok(Value::from(self.map_path(&text()).to_string_lossy().into_owned())),
            "scripttimeout" => self.get_property(name),
            _ => Err(not_found(self, name)),
        }
    }
}
