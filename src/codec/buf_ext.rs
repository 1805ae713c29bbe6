use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};


#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}


/// Fallible reads for the protocol's composite primitives. Fixed-width integers and floats
///  are read with `Buf`'s own `try_get_*` functions.
pub trait BufExt: Buf + VarIntSupport + Sized {
    fn try_get_bool(&mut self) -> anyhow::Result<bool> {
        match self.try_get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(anyhow!("invalid bool value {}", other)),
        }
    }

    fn try_get_string(&mut self) -> anyhow::Result<String> {
        let len = self.try_get_usize_varint()
            .map_err(|e| anyhow!("invalid string length: {:?}", e))?;
        if self.remaining() < len {
            bail!("string of length {} exceeds remaining buffer of {} bytes", len, self.remaining());
        }

        let mut result = vec![0; len];
        self.copy_to_slice(&mut result);
        Ok(String::from_utf8(result)?)
    }

    fn try_get_vec2(&mut self) -> anyhow::Result<Vec2> {
        Ok(Vec2 {
            x: self.try_get_f32()?,
            y: self.try_get_f32()?,
        })
    }

    fn try_get_vec3(&mut self) -> anyhow::Result<Vec3> {
        Ok(Vec3 {
            x: self.try_get_f32()?,
            y: self.try_get_f32()?,
            z: self.try_get_f32()?,
        })
    }
}

pub trait BufMutExt: BufMut + VarIntSupportMut + Sized {
    fn put_bool(&mut self, v: bool) {
        self.put_u8(if v { 1 } else { 0 });
    }

    fn put_string(&mut self, s: &str) {
        self.put_usize_varint(s.len());
        self.put_slice(s.as_bytes());
    }

    fn put_vec2(&mut self, v: Vec2) {
        self.put_f32(v.x);
        self.put_f32(v.y);
    }

    fn put_vec3(&mut self, v: Vec3) {
        self.put_f32(v.x);
        self.put_f32(v.y);
        self.put_f32(v.z);
    }
}

impl <T: Buf> BufExt for T {
}

impl <T: BufMut> BufMutExt for T {
}
